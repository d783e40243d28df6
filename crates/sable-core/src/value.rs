//! The tagged value representation and the equality, truthiness and hashing
//! rules over it.

use crate::{
    object::{ObjRef, ObjectKind},
    vm::Vm,
};

/// A Sable value.
///
/// The only unboxed payloads are signed 64-bit integers; every other type
/// lives on the heap behind an [`ObjRef`]. `Undefined` is a sentinel used
/// internally (dictionary free slots, "no entry" results) and must never
/// reach user code; `Null` is the user-visible nil value.
///
/// The derived `PartialEq` is *representational* equality, used by tests and
/// internal data structures. Language-level equality lives in
/// [`Vm::values_equal`], which treats `Undefined` as unequal to everything,
/// itself included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Value {
    /// Sentinel for "no value". Not user-visible.
    #[default]
    Undefined,
    /// The user-visible nil value.
    Null,
    /// A signed 64-bit integer.
    Integer(i64),
    /// Reference to a heap object.
    Object(ObjRef),
}

impl Value {
    /// Canonical false value.
    pub const ZERO: Value = Value::Integer(0);
    /// Canonical true value.
    pub const ONE: Value = Value::Integer(1);

    /// Converts a boolean into its canonical integer value.
    pub fn from_bool(value: bool) -> Value {
        if value {
            Value::ONE
        } else {
            Value::ZERO
        }
    }

    /// Determines whether the value "is" or "isn't": `Undefined`, `Null` and
    /// integer zero are falsy, everything else (empty strings and empty lists
    /// included) is truthy.
    pub fn is_truthy(self) -> bool {
        !matches!(self, Value::Undefined | Value::Null | Value::Integer(0))
    }

    /// Inverse of [`Value::is_truthy`].
    pub fn is_falsy(self) -> bool {
        !self.is_truthy()
    }

    /// Returns whether this is the `Undefined` sentinel.
    pub fn is_undefined(self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns whether this is the user-visible `Null`.
    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the heap reference if this value is an object.
    pub fn as_object(self) -> Option<ObjRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the integer payload if this value is an integer.
    pub fn as_integer(self) -> Option<i64> {
        match self {
            Value::Integer(int) => Some(int),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(int: i64) -> Self {
        Value::Integer(int)
    }
}

/// Mixes a 64-bit integer down to a 32-bit hash (splitmix-style finalizer).
#[inline]
pub(crate) fn hash_integer(value: i64) -> u32 {
    #[allow(clippy::cast_sign_loss)]
    let mut mixed = (value as u64).wrapping_add(0x9e37_79b9_7f4a_7c15);
    mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    mixed ^= mixed >> 31;
    #[allow(clippy::cast_possible_truncation)]
    let folded = (mixed ^ (mixed >> 32)) as u32;
    folded
}

impl Vm {
    /// Structural equality: identical types required; integers compare
    /// numerically, strings by content (which interning reduces to handle
    /// equality), ranges by endpoints and inclusivity, everything else by
    /// identity. `Undefined` is not equal to anything, including itself.
    pub fn values_equal(&self, left: Value, right: Value) -> bool {
        match (left, right) {
            (Value::Undefined, _) | (_, Value::Undefined) => false,
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                if a == b {
                    return true;
                }
                let (ha, hb) = (self.header(a), self.header(b));
                if ha.kind() != ObjectKind::Range || hb.kind() != ObjectKind::Range {
                    return false;
                }
                let ra = self.range_payload(a);
                let rb = self.range_payload(b);
                ra.from == rb.from && ra.to == rb.to && ra.inclusive == rb.inclusive
            }
            _ => false,
        }
    }

    /// Identity: numeric equality for integers, strict handle equality for
    /// all object types. Used where user-visible identity semantics are
    /// required (ranges with equal endpoints are *not* identical).
    pub fn values_identical(&self, left: Value, right: Value) -> bool {
        match (left, right) {
            (Value::Undefined, _) | (_, Value::Undefined) => false,
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// Hashes a value for use as a dictionary key, or `None` if the value is
    /// not hashable. The hashable set is exactly: integers, strings, ranges
    /// and classes. Callers attempting to use anything else as a key surface
    /// the failure as a runtime error.
    pub fn value_hash(&self, value: Value) -> Option<u32> {
        match value {
            Value::Integer(int) => Some(hash_integer(int)),
            Value::Object(obj) => match self.header(obj).kind() {
                ObjectKind::String => Some(self.string_payload(obj).hash()),
                ObjectKind::Range => {
                    let range = self.range_payload(obj);
                    Some(
                        hash_integer(range.from)
                            ^ hash_integer(range.to).rotate_left(16)
                            ^ u32::from(range.inclusive),
                    )
                }
                // Classes hash by identity.
                ObjectKind::Class => Some(hash_integer(i64::from(obj.index()))),
                _ => None,
            },
            Value::Undefined | Value::Null => None,
        }
    }
}
