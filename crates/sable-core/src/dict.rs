//! The open-addressed hash-table dictionary.
//!
//! Entries use a two-sentinel scheme: an `Undefined` key marks a free slot,
//! while a live key with an `Undefined` value marks a tombstone (deleted; a
//! probe must not stop there). Capacity is always a power of two of at least
//! 32 slots, so the probe index is `hash & (capacity - 1)`.

use std::{error, fmt, mem};

use crate::{
    object::{DictRef, Payload},
    value::Value,
    vm::Vm,
};

/// Smallest non-empty table capacity.
const MIN_CAPACITY: usize = 32;

/// A dictionary key/value pair.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub(crate) key: Value,
    pub(crate) value: Value,
}

const FREE: Entry = Entry {
    key: Value::Undefined,
    value: Value::Undefined,
};

/// The probing table shared by dictionary objects and the module string
/// tables. Key hashing and equality go through the [`Vm`], so mutating
/// callers detach the table (`mem::take`) for the duration of the operation.
#[derive(Debug, Default)]
pub(crate) struct RawTable {
    entries: Box<[Entry]>,
    count: usize,
    tombstones: usize,
}

impl RawTable {
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Looks up `key`, returning its value or `Undefined` if absent (or if
    /// `key` is not hashable, in which case it cannot be present).
    pub(crate) fn get(&self, vm: &Vm, key: Value) -> Value {
        if self.capacity() == 0 {
            return Value::Undefined;
        }
        let Some(hash) = vm.value_hash(key) else {
            return Value::Undefined;
        };

        let mask = self.capacity() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_undefined() {
                return Value::Undefined;
            }
            // Tombstones keep their key but hold an Undefined value; skip
            // them without stopping the probe.
            if !entry.value.is_undefined() && vm.values_equal(entry.key, key) {
                return entry.value;
            }
            index = (index + 1) & mask;
        }
    }

    /// Inserts or overwrites `key`. The caller has already checked that the
    /// key is hashable.
    pub(crate) fn set(&mut self, vm: &Vm, key: Value, value: Value) {
        debug_assert!(!value.is_undefined(), "Undefined is reserved for slots");
        if self.capacity() == 0
            || (self.count + self.tombstones + 1) * 4 > self.capacity() * 3
        {
            self.grow(vm);
        }

        let hash = vm.value_hash(key).expect("dict keys are hashable");
        let mask = self.capacity() - 1;
        let mut index = hash as usize & mask;
        let mut first_tombstone = None;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_undefined() {
                let target = first_tombstone.unwrap_or(index);
                if first_tombstone.is_some() {
                    self.tombstones -= 1;
                }
                self.entries[target] = Entry { key, value };
                self.count += 1;
                return;
            }
            if entry.value.is_undefined() {
                if first_tombstone.is_none() {
                    first_tombstone = Some(index);
                }
            } else if vm.values_equal(entry.key, key) {
                self.entries[index].value = value;
                return;
            }
            index = (index + 1) & mask;
        }
    }

    /// Removes `key`, leaving a tombstone. Returns the old value, or `Null`
    /// if the key was absent.
    pub(crate) fn remove(&mut self, vm: &Vm, key: Value) -> Value {
        if self.capacity() == 0 {
            return Value::Null;
        }
        let Some(hash) = vm.value_hash(key) else {
            return Value::Null;
        };

        let mask = self.capacity() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_undefined() {
                return Value::Null;
            }
            if !entry.value.is_undefined() && vm.values_equal(entry.key, key) {
                let old = entry.value;
                self.entries[index].value = Value::Undefined;
                self.count -= 1;
                self.tombstones += 1;
                return old;
            }
            index = (index + 1) & mask;
        }
    }

    /// Releases the entry storage and resets the table to zero capacity.
    pub(crate) fn clear(&mut self) {
        self.entries = Box::default();
        self.count = 0;
        self.tombstones = 0;
    }

    /// Advances the cursor past free and tombstone slots and returns the next
    /// live key, or `Undefined` once exhausted.
    pub(crate) fn iterate(&self, cursor: &mut DictIterator) -> Value {
        while cursor.0 < self.capacity() {
            let entry = &self.entries[cursor.0];
            cursor.0 += 1;
            if !entry.key.is_undefined() && !entry.value.is_undefined() {
                return entry.key;
            }
        }
        Value::Undefined
    }

    /// Iterates the live entries, in table order.
    pub(crate) fn live_entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_undefined() && !entry.value.is_undefined())
            .copied()
    }

    /// Rehashes into a table large enough that the next insertion stays under
    /// the occupancy trigger. Tombstones are dropped.
    fn grow(&mut self, vm: &Vm) {
        let required = self.count + 1;
        let mut capacity = MIN_CAPACITY.max(self.capacity());
        while required * 4 > capacity * 3 {
            capacity *= 2;
        }

        let old = mem::replace(&mut self.entries, vec![FREE; capacity].into_boxed_slice());
        self.tombstones = 0;
        let mask = capacity - 1;
        for entry in old.iter() {
            if entry.key.is_undefined() || entry.value.is_undefined() {
                continue;
            }
            let hash = vm.value_hash(entry.key).expect("dict keys are hashable");
            let mut index = hash as usize & mask;
            while !self.entries[index].key.is_undefined() {
                index = (index + 1) & mask;
            }
            self.entries[index] = *entry;
        }
    }
}

/// A hash-table dictionary object.
#[derive(Debug, Default)]
pub struct DictObject {
    pub(crate) table: RawTable,
}

impl DictObject {
    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the dictionary holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Current slot capacity (a power of two, or zero when empty).
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Single-cursor dictionary iteration state. Mutating the dictionary while
/// iterating is undefined: entries may be missed or repeated, but iteration
/// never goes out of bounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DictIterator(usize);

impl DictIterator {
    /// A cursor positioned at the start of the table.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Error returned when a value outside the hashable set (integers, strings,
/// ranges, classes) is used as a dictionary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnhashableKey;

impl fmt::Display for UnhashableKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("value cannot be used as a dictionary key")
    }
}

impl error::Error for UnhashableKey {}

impl Vm {
    /// Creates a new, empty dictionary.
    pub fn dict_new(&mut self) -> DictRef {
        let class = self.core_class(|classes| classes.dict);
        self.new_object(class, Payload::Dict(DictObject::default()))
    }

    /// Looks up `key`, returning its value or `Undefined` if absent.
    pub fn dict_get(&self, dict: DictRef, key: Value) -> Value {
        self.dict(dict).table.get(self, key)
    }

    /// Inserts or overwrites `key`. Fails if the key is not hashable.
    pub fn dict_set(&mut self, dict: DictRef, key: Value, value: Value) -> Result<(), UnhashableKey> {
        if self.value_hash(key).is_none() {
            return Err(UnhashableKey);
        }
        let mut table = mem::take(&mut self.dict_mut(dict).table);
        table.set(self, key, value);
        self.dict_mut(dict).table = table;
        Ok(())
    }

    /// Removes `key`, returning the old value or `Null` if it was absent.
    pub fn dict_remove(&mut self, dict: DictRef, key: Value) -> Value {
        let mut table = mem::take(&mut self.dict_mut(dict).table);
        let old = table.remove(self, key);
        self.dict_mut(dict).table = table;
        old
    }

    /// Removes all entries and releases the entry storage.
    pub fn dict_clear(&mut self, dict: DictRef) {
        self.dict_mut(dict).table.clear();
    }

    /// Number of live entries in the dictionary.
    pub fn dict_len(&self, dict: DictRef) -> usize {
        self.dict(dict).len()
    }

    /// Returns the next key under the cursor, or `Undefined` when exhausted.
    pub fn dict_iterate(&self, dict: DictRef, cursor: &mut DictIterator) -> Value {
        self.dict(dict).table.iterate(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_empty_dict() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        assert_eq!(vm.dict_get(dict, Value::Integer(1)), Value::Undefined);
        assert_eq!(vm.dict_len(dict), 0);
        assert_eq!(vm.dict(dict).capacity(), 0);
    }

    #[test]
    fn set_get_round_trip() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        for i in 0..100 {
            vm.dict_set(dict, Value::Integer(i), Value::Integer(i * 10)).unwrap();
        }
        assert_eq!(vm.dict_len(dict), 100);
        for i in 0..100 {
            assert_eq!(vm.dict_get(dict, Value::Integer(i)), Value::Integer(i * 10));
        }
        // Overwrite keeps the count stable.
        vm.dict_set(dict, Value::Integer(3), Value::Null).unwrap();
        assert_eq!(vm.dict_len(dict), 100);
        assert_eq!(vm.dict_get(dict, Value::Integer(3)), Value::Null);
    }

    #[test]
    fn capacity_is_a_power_of_two_of_at_least_32() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        vm.dict_set(dict, Value::Integer(1), Value::ONE).unwrap();
        assert_eq!(vm.dict(dict).capacity(), 32);
        for i in 0..200 {
            vm.dict_set(dict, Value::Integer(i), Value::ONE).unwrap();
        }
        let capacity = vm.dict(dict).capacity();
        assert!(capacity.is_power_of_two());
        assert!(capacity * 3 >= vm.dict_len(dict) * 4);
    }

    #[test]
    fn remove_leaves_a_probing_tombstone() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        vm.dict_set(dict, Value::Integer(1), Value::Integer(100)).unwrap();

        // Find a key that probes through slot of key 1.
        let capacity = vm.dict(dict).capacity();
        let base = crate::value::hash_integer(1) as usize & (capacity - 1);
        let colliding = (2..)
            .find(|&k| crate::value::hash_integer(k) as usize & (capacity - 1) == base)
            .unwrap();
        vm.dict_set(dict, Value::Integer(colliding), Value::Integer(200)).unwrap();

        assert_eq!(vm.dict_remove(dict, Value::Integer(1)), Value::Integer(100));
        // The collided key is still reachable through the tombstone.
        assert_eq!(vm.dict_get(dict, Value::Integer(colliding)), Value::Integer(200));
        assert_eq!(vm.dict_get(dict, Value::Integer(1)), Value::Undefined);
        assert_eq!(vm.dict_len(dict), 1);
    }

    #[test]
    fn remove_missing_key_returns_null() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        assert_eq!(vm.dict_remove(dict, Value::Integer(9)), Value::Null);
        vm.dict_set(dict, Value::Integer(1), Value::ONE).unwrap();
        assert_eq!(vm.dict_remove(dict, Value::Integer(9)), Value::Null);
    }

    #[test]
    fn resize_drops_tombstones_and_preserves_entries() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        for i in 0..24 {
            vm.dict_set(dict, Value::Integer(i), Value::Integer(-i)).unwrap();
        }
        for i in 0..12 {
            vm.dict_remove(dict, Value::Integer(i));
        }
        // Push occupancy over the trigger so the next inserts force a rehash.
        for i in 100..160 {
            vm.dict_set(dict, Value::Integer(i), Value::Integer(-i)).unwrap();
        }
        for i in 12..24 {
            assert_eq!(vm.dict_get(dict, Value::Integer(i)), Value::Integer(-i));
        }
        for i in 100..160 {
            assert_eq!(vm.dict_get(dict, Value::Integer(i)), Value::Integer(-i));
        }
        for i in 0..12 {
            assert_eq!(vm.dict_get(dict, Value::Integer(i)), Value::Undefined);
        }
    }

    #[test]
    fn iteration_visits_every_live_key_once() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        for i in 0..50 {
            vm.dict_set(dict, Value::Integer(i), Value::ONE).unwrap();
        }
        vm.dict_remove(dict, Value::Integer(7));

        let mut cursor = DictIterator::new();
        let mut seen = Vec::new();
        loop {
            let key = vm.dict_iterate(dict, &mut cursor);
            if key.is_undefined() {
                break;
            }
            seen.push(key.as_integer().unwrap());
        }
        seen.sort_unstable();
        let expected: Vec<i64> = (0..50).filter(|&i| i != 7).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn clear_releases_storage() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        for i in 0..10 {
            vm.dict_set(dict, Value::Integer(i), Value::ONE).unwrap();
        }
        vm.dict_clear(dict);
        assert_eq!(vm.dict_len(dict), 0);
        assert_eq!(vm.dict(dict).capacity(), 0);
        assert_eq!(vm.dict_get(dict, Value::Integer(1)), Value::Undefined);
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        let list = vm.list_new(0);
        assert_eq!(
            vm.dict_set(dict, Value::from(list), Value::ONE),
            Err(UnhashableKey)
        );
        assert_eq!(vm.dict_set(dict, Value::Null, Value::ONE), Err(UnhashableKey));
    }

    #[test]
    fn string_keys_use_interned_identity() {
        let mut vm = Vm::new();
        let dict = vm.dict_new();
        let key1 = vm.string_from_bytes(b"name");
        vm.dict_set(dict, Value::from(key1), Value::Integer(1)).unwrap();
        let key2 = vm.string_from_bytes(b"name");
        assert_eq!(vm.dict_get(dict, Value::from(key2)), Value::Integer(1));
    }
}
