//! The growable value array.

use crate::{
    object::{ListRef, Payload},
    value::Value,
    vm::Vm,
};

/// A list object: a plain dynamic array of values. Capacity grows
/// geometrically through the backing `Vec`.
#[derive(Debug, Default)]
pub struct ListObject {
    pub(crate) elements: Vec<Value>,
}

impl ListObject {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the list holds no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The elements, in order.
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }
}

impl Vm {
    /// Creates a list with `len` live elements, initialized to `Null`. The
    /// caller is expected to fill them in.
    pub fn list_new(&mut self, len: usize) -> ListRef {
        let class = self.core_classes().list;
        self.new_object(
            Some(class),
            Payload::List(ListObject {
                elements: vec![Value::Null; len],
            }),
        )
    }

    /// Inserts `element` at `index`, shifting later elements up. Valid
    /// indices are `0..=len`.
    pub fn list_insert(&mut self, list: ListRef, index: usize, element: Value) {
        self.list_mut(list).elements.insert(index, element);
    }

    /// Removes and returns the element at `index`, shifting later elements
    /// down. Valid indices are `0..len`.
    pub fn list_remove(&mut self, list: ListRef, index: usize) -> Value {
        self.list_mut(list).elements.remove(index)
    }

    /// Appends `source`'s elements to `destination`, or to a fresh list when
    /// no destination is given. Returns the destination.
    pub fn list_concatenate(
        &mut self,
        destination: Option<ListRef>,
        source: ListRef,
    ) -> ListRef {
        let destination = destination.unwrap_or_else(|| self.list_new(0));
        let elements = self.list(source).elements.clone();
        self.list_mut(destination).elements.extend(elements);
        destination
    }

    /// Resets the list to empty.
    pub fn list_clear(&mut self, list: ListRef) {
        self.list_mut(list).elements.clear();
    }

    /// Writes `element` at `index`. Valid indices are `0..len`.
    pub fn list_store(&mut self, list: ListRef, index: usize, element: Value) {
        self.list_mut(list).elements[index] = element;
    }
}
