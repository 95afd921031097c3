/// An interned byte string plus its precomputed FNV-1a hash.
///
/// Construction always goes through `Heap::intern`, so two `LString`s with
/// equal `bytes` never coexist: string identity implies equality.
pub struct LString {
    pub bytes: Box<str>,
    pub hash: u32,
}

impl LString {
    pub fn as_str(&self) -> &str {
        &self.bytes
    }

    /// Overwrites the byte at `idx` in place, for `s[i] = "c"` assignment.
    /// Indexing is byte-oriented, not Unicode-aware (data model non-goal),
    /// so the caller is responsible for `idx` and the replacement both
    /// landing on single-byte (ASCII) characters; anything else would
    /// corrupt the buffer's UTF-8 validity.
    ///
    /// This mutates a supposedly-interned string's content without
    /// rekeying the intern table, so the table's entry for the old bytes
    /// goes stale (it now maps to an object with different content) until
    /// a later GC cycle drops it for being unreachable by that key — a
    /// quirk inherited as-is rather than papered over; see DESIGN.md.
    pub fn set_byte(&mut self, idx: usize, byte: u8) {
        // Safety: `idx < self.bytes.len()` is checked by the caller, and a
        // single-byte replacement of an already-ASCII byte can't split a
        // multi-byte UTF-8 sequence elsewhere in the buffer.
        unsafe { self.bytes.as_bytes_mut()[idx] = byte };
    }
}

/// FNV-1a, 32-bit, matching the data model's precomputed string hash.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}
