//! The immutable, interned string type and the VM-wide interning store.

use crate::{
    object::{Payload, StringRef},
    utf8,
    vm::Vm,
};

/// A string object: an immutable byte buffer with a precomputed hash.
///
/// The stored length is the *byte* length, not the codepoint count. Strings
/// are interned — two strings with the same bytes are the same object, so
/// handle equality is content equality.
#[derive(Debug)]
pub struct StringObject {
    bytes: Box<[u8]>,
    hash: u32,
}

impl StringObject {
    pub(crate) fn new(bytes: Vec<u8>, hash: u32) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
            hash,
        }
    }

    /// The raw bytes of the string.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte length (not codepoint count).
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the string has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The hash computed when the string was created.
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// FNV-1a over the byte content.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Substring search (Boyer-Moore-Horspool). Returns the byte offset of the
/// first occurrence of `needle` in `haystack`.
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }

    let mut shift = [needle.len(); 256];
    for (i, &byte) in needle[..needle.len() - 1].iter().enumerate() {
        shift[byte as usize] = needle.len() - 1 - i;
    }

    let mut offset = 0;
    while offset + needle.len() <= haystack.len() {
        let window = &haystack[offset..offset + needle.len()];
        if window == needle {
            return Some(offset);
        }
        let last = window[needle.len() - 1];
        offset += shift[last as usize];
    }
    None
}

const INTERNER_MIN_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) enum InternSlot {
    #[default]
    Empty,
    /// A swept string used to live here; probes must continue past it.
    Dead,
    Live {
        hash: u32,
        string: StringRef,
    },
}

/// The string-interning store: an open-addressed set keyed by byte content.
/// Entry hashes are stored inline so growth never touches the object arena;
/// swept strings leave `Dead` slots behind.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    pub(crate) entries: Vec<InternSlot>,
    count: usize,
    tombstones: usize,
}

impl Interner {
    pub(crate) fn insert(&mut self, hash: u32, string: StringRef) {
        if self.entries.is_empty()
            || (self.count + self.tombstones + 1) * 4 > self.entries.len() * 3
        {
            self.grow();
        }

        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.entries[index] {
                InternSlot::Empty => {
                    self.entries[index] = InternSlot::Live { hash, string };
                    self.count += 1;
                    return;
                }
                InternSlot::Dead => {
                    self.entries[index] = InternSlot::Live { hash, string };
                    self.count += 1;
                    self.tombstones -= 1;
                    return;
                }
                InternSlot::Live { .. } => index = (index + 1) & mask,
            }
        }
    }

    /// Drops the entry for a string that is about to be destroyed. Compares
    /// by handle, so the arena does not need to be readable.
    pub(crate) fn remove(&mut self, hash: u32, string: StringRef) {
        if self.entries.is_empty() {
            return;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.entries[index] {
                InternSlot::Empty => return,
                InternSlot::Live { string: found, .. } if found == string => {
                    self.entries[index] = InternSlot::Dead;
                    self.count -= 1;
                    self.tombstones += 1;
                    return;
                }
                InternSlot::Dead | InternSlot::Live { .. } => index = (index + 1) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let required = self.count + 1;
        let mut capacity = INTERNER_MIN_CAPACITY.max(self.entries.len());
        while required * 4 > capacity * 3 {
            capacity *= 2;
        }

        let old = std::mem::replace(&mut self.entries, vec![InternSlot::Empty; capacity]);
        self.tombstones = 0;
        let mask = capacity - 1;
        for slot in old {
            if let InternSlot::Live { hash, string } = slot {
                let mut index = hash as usize & mask;
                while matches!(self.entries[index], InternSlot::Live { .. }) {
                    index = (index + 1) & mask;
                }
                self.entries[index] = InternSlot::Live { hash, string };
            }
        }
    }
}

/// One argument to [`Vm::string_format`].
#[derive(Debug, Clone, Copy)]
pub enum FormatArg<'a> {
    /// Substituted for a `$` specifier: a raw byte string.
    Raw(&'a [u8]),
    /// Substituted for an `@` specifier: a string object.
    String(StringRef),
}

impl Vm {
    /// Creates (or finds) the interned string with the given byte content.
    pub fn string_from_bytes(&mut self, bytes: &[u8]) -> StringRef {
        let hash = hash_bytes(bytes);
        if let Some(existing) = self.find_interned(hash, bytes) {
            return existing;
        }
        let class = self.core_class(|classes| classes.string);
        let string = self.new_object(
            class,
            Payload::String(StringObject::new(bytes.to_vec(), hash)),
        );
        self.interner.insert(hash, string);
        string
    }

    /// Creates a string from a slice of `source`: `count` bytes starting at
    /// `start`, walking forwards (`step == 1`) or backwards (`step == -1`).
    pub fn string_from_slice(
        &mut self,
        source: StringRef,
        start: usize,
        count: usize,
        step: i64,
    ) -> StringRef {
        debug_assert!(step == 1 || step == -1, "step must be +1 or -1");
        let bytes = {
            let source = self.string(source).as_bytes();
            let mut bytes = Vec::with_capacity(count);
            let mut index = start;
            for _ in 0..count {
                bytes.push(source[index]);
                if step > 0 {
                    index += 1;
                } else if index > 0 {
                    index -= 1;
                }
            }
            bytes
        };
        self.string_from_bytes(&bytes)
    }

    /// Creates a string holding the decimal representation of `value`.
    pub fn string_from_integer(&mut self, value: i64) -> StringRef {
        self.string_from_bytes(value.to_string().as_bytes())
    }

    /// Creates a single-codepoint string, or `None` if `codepoint` is not
    /// encodable.
    pub fn string_from_codepoint(&mut self, codepoint: u32) -> Option<StringRef> {
        let mut buffer = [0_u8; 4];
        let written = utf8::encode(codepoint, &mut buffer);
        if written == 0 {
            return None;
        }
        Some(self.string_from_bytes(&buffer[..written]))
    }

    /// Creates a string holding the one codepoint found at byte offset
    /// `index` of `source`, or `None` if no valid codepoint starts there.
    pub fn string_from_byte_index(
        &mut self,
        source: StringRef,
        index: usize,
    ) -> Option<StringRef> {
        let (buffer, written) = {
            let bytes = self.string(source).as_bytes();
            let codepoint = utf8::decode(bytes.get(index..)?)?;
            let mut buffer = [0_u8; 4];
            let written = utf8::encode(codepoint, &mut buffer);
            (buffer, written)
        };
        Some(self.string_from_bytes(&buffer[..written]))
    }

    /// Builds a string from a tiny format language: `$` interpolates a raw
    /// byte string, `@` interpolates a string object; every other byte is
    /// copied through. Arguments are consumed in order and must match their
    /// specifiers.
    pub fn string_format(&mut self, template: &str, args: &[FormatArg<'_>]) -> StringRef {
        let mut out = Vec::with_capacity(template.len());
        let mut args = args.iter();
        for &byte in template.as_bytes() {
            match byte {
                b'$' => match args.next() {
                    Some(FormatArg::Raw(bytes)) => out.extend_from_slice(bytes),
                    other => panic!("format `$` expects a raw byte argument, got {other:?}"),
                },
                b'@' => match args.next() {
                    Some(FormatArg::String(string)) => {
                        out.extend_from_slice(self.string(*string).as_bytes());
                    }
                    other => panic!("format `@` expects a string argument, got {other:?}"),
                },
                _ => out.push(byte),
            }
        }
        debug_assert!(args.next().is_none(), "unconsumed format arguments");
        self.string_from_bytes(&out)
    }

    /// Searches for `needle` within `haystack`, returning the byte offset of
    /// the first occurrence.
    pub fn string_find(&self, haystack: StringRef, needle: StringRef) -> Option<usize> {
        find_bytes(
            self.string(haystack).as_bytes(),
            self.string(needle).as_bytes(),
        )
    }

    fn find_interned(&self, hash: u32, bytes: &[u8]) -> Option<StringRef> {
        if self.interner.entries.is_empty() {
            return None;
        }
        let mask = self.interner.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.interner.entries[index] {
                InternSlot::Empty => return None,
                InternSlot::Live {
                    hash: found_hash,
                    string,
                } if found_hash == hash && self.string(string).as_bytes() == bytes => {
                    return Some(string);
                }
                InternSlot::Dead | InternSlot::Live { .. } => index = (index + 1) & mask,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn equal_bytes_intern_to_the_same_object() {
        let mut vm = Vm::new();
        let first = vm.string_from_bytes(b"fiber");
        let second = vm.string_from_bytes(b"fiber");
        assert_eq!(first, second);
        assert!(vm.values_equal(Value::from(first), Value::from(second)));
        assert!(vm.values_identical(Value::from(first), Value::from(second)));

        let different = vm.string_from_bytes(b"fibre");
        assert_ne!(first, different);
    }

    #[test]
    fn interner_survives_growth() {
        let mut vm = Vm::new();
        let mut refs = Vec::new();
        for i in 0..500 {
            let text = format!("symbol-{i}");
            refs.push((text.clone(), vm.string_from_bytes(text.as_bytes())));
        }
        for (text, reference) in refs {
            assert_eq!(vm.string_from_bytes(text.as_bytes()), reference);
        }
    }

    #[test]
    fn hash_is_precomputed_fnv1a() {
        let mut vm = Vm::new();
        let string = vm.string_from_bytes(b"hello");
        assert_eq!(vm.string(string).hash(), hash_bytes(b"hello"));
        assert_eq!(hash_bytes(b""), 0x811c_9dc5);
    }

    #[test]
    fn slice_forwards_and_backwards() {
        let mut vm = Vm::new();
        let source = vm.string_from_bytes(b"runtime");
        let forward = vm.string_from_slice(source, 0, 3, 1);
        assert_eq!(vm.string(forward).as_bytes(), b"run");
        let backward = vm.string_from_slice(source, 6, 3, -1);
        assert_eq!(vm.string(backward).as_bytes(), b"emi");
    }

    #[test]
    fn integer_to_decimal_string() {
        let mut vm = Vm::new();
        let zero = vm.string_from_integer(0);
        assert_eq!(vm.string(zero).as_bytes(), b"0");
        let negative = vm.string_from_integer(-42);
        assert_eq!(vm.string(negative).as_bytes(), b"-42");
        let min = vm.string_from_integer(i64::MIN);
        assert_eq!(vm.string(min).as_bytes(), b"-9223372036854775808");
    }

    #[test]
    fn codepoint_strings() {
        let mut vm = Vm::new();
        let ascii = vm.string_from_codepoint(u32::from(b'x')).unwrap();
        assert_eq!(vm.string(ascii).as_bytes(), b"x");
        let euro = vm.string_from_codepoint(0x20ac).unwrap();
        assert_eq!(vm.string(euro).as_bytes(), "€".as_bytes());
        assert_eq!(vm.string_from_codepoint(0xd800), None);
    }

    #[test]
    fn codepoint_at_byte_index() {
        let mut vm = Vm::new();
        let source = vm.string_from_bytes("a€b".as_bytes());
        let at_one = vm.string_from_byte_index(source, 1).unwrap();
        assert_eq!(vm.string(at_one).as_bytes(), "€".as_bytes());
        // Offset 2 lands inside the multi-byte sequence.
        assert_eq!(vm.string_from_byte_index(source, 2), None);
        assert_eq!(vm.string_from_byte_index(source, 100), None);
    }

    #[test]
    fn format_mixes_raw_and_object_arguments() {
        let mut vm = Vm::new();
        let bar = vm.string_from_bytes(b"bar");
        let formatted = vm.string_format("$/@", &[FormatArg::Raw(b"foo"), FormatArg::String(bar)]);
        assert_eq!(vm.string(formatted).as_bytes(), b"foo/bar");
    }

    #[test]
    fn find_returns_byte_offsets() {
        let mut vm = Vm::new();
        let haystack = vm.string_from_bytes(b"hello world");
        let needle = vm.string_from_bytes(b"world");
        assert_eq!(vm.string_find(haystack, needle), Some(6));

        let missing = vm.string_from_bytes(b"xyz");
        assert_eq!(vm.string_find(haystack, missing), None);

        let empty = vm.string_from_bytes(b"");
        assert_eq!(vm.string_find(haystack, empty), Some(0));

        // Repeated-prefix needle exercises the skip table.
        let tricky_haystack = vm.string_from_bytes(b"aabaabaabaac");
        let tricky_needle = vm.string_from_bytes(b"aabaac");
        assert_eq!(vm.string_find(tricky_haystack, tricky_needle), Some(6));
    }
}
