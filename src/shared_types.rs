/// Label (100) + `;` + value (5) + `\n` is 107 bytes, rounded up.
pub(crate) const MAX_LINE_SIZE: usize = 128;
/// Label (1) + `;` + value (3) + `\n`.
pub(crate) const MIN_LINE_SIZE: usize = 6;

/// Half-open byte span `[offset, offset + length)` of the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

impl ByteRange {
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.length == 0
    }
}

pub(crate) type ByteCount = u64;
