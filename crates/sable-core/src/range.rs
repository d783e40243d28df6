//! The integer interval object.

use crate::{
    object::{Payload, RangeRef},
    vm::Vm,
};

/// Endpoint type of a range. Only integer endpoints exist today; the
/// discriminant is carried as data so the representation can grow without a
/// layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeKind {
    /// Integer endpoints.
    #[default]
    Integer,
}

/// An immutable integer interval, `[from, to]` when inclusive and
/// `[from, to)` otherwise. Iteration semantics belong to the interpreter;
/// the object itself is pure data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeObject {
    /// Endpoint type; always [`RangeKind::Integer`] in the current design.
    pub kind: RangeKind,
    /// Starting endpoint.
    pub from: i64,
    /// Ending endpoint.
    pub to: i64,
    /// Whether `to` is part of the interval.
    pub inclusive: bool,
}

impl Vm {
    /// Creates a range object.
    pub fn range_new(&mut self, from: i64, to: i64, inclusive: bool) -> RangeRef {
        let class = self.core_classes().range;
        self.new_object(
            Some(class),
            Payload::Range(RangeObject {
                kind: RangeKind::Integer,
                from,
                to,
                inclusive,
            }),
        )
    }
}
