//! Hot-path byte search and value decoding.
//!
//! Both routines assume the fixed line grammar `<name>;<value>\n` and are
//! only ever applied to small windows (a name plus its delimiter, or a value
//! plus its terminator). They are not general-purpose parsers.

use xxhash_rust::xxh3::xxh3_64;

const LOW_BITS: u64 = 0x7F7F_7F7F_7F7F_7F7F;
const LANES: u64 = 0x0101_0101_0101_0101;

/// Exact powers of ten, indexed by fractional digit count.
const POW10: [f64; 4] = [1e0, 1e1, 1e2, 1e3];

pub(crate) const SEMICOLON: BytePattern = BytePattern::new(b';');
pub(crate) const NEWLINE: BytePattern = BytePattern::new(b'\n');

/// A target byte broadcast into all eight lanes of a word.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BytePattern {
    byte: u8,
    word: u64,
}

impl BytePattern {
    pub(crate) const fn new(byte: u8) -> Self {
        Self {
            byte,
            word: byte as u64 * LANES,
        }
    }

    /// Lane of the first occurrence in a big-endian loaded word, 8 if none.
    #[inline(always)]
    fn first_in_word(&self, word: u64) -> usize {
        let input = word ^ self.word;
        let tmp = (input & LOW_BITS).wrapping_add(LOW_BITS);
        let tmp = !(tmp | input | LOW_BITS);
        (tmp.leading_zeros() >> 3) as usize
    }

    /// Index of the first occurrence of the pattern byte in `haystack`.
    #[inline]
    pub(crate) fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        for (word_index, chunk) in haystack.chunks(8).enumerate() {
            // a short final chunk is padded with bytes that can't match
            let mut lanes = [!self.byte; 8];
            lanes[..chunk.len()].copy_from_slice(chunk);
            let lane = self.first_in_word(u64::from_be_bytes(lanes));
            if lane != 8 {
                return Some(word_index * 8 + lane);
            }
        }
        None
    }
}

pub(crate) fn find_byte(haystack: &[u8], target: u8) -> Option<usize> {
    BytePattern::new(target).find_in(haystack)
}

/// Decodes `-?D{1,2}(.D)?`. Input is trusted: no validation happens, but
/// malformed bytes yield a garbage number rather than a panic.
#[inline]
pub(crate) fn decode_value(bytes: &[u8]) -> f64 {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    let mut mantissa: u64 = 0;
    let mut fraction_digits = 0;
    let mut in_fraction = false;
    for &byte in digits {
        if byte == b'.' {
            in_fraction = true;
            continue;
        }
        mantissa = mantissa
            .wrapping_mul(10)
            .wrapping_add(u64::from(byte.wrapping_sub(b'0')));
        if in_fraction {
            fraction_digits += 1;
        }
    }
    // one division by an exact power of ten keeps the result correctly rounded
    let value = mantissa as f64 / POW10[fraction_digits.min(POW10.len() - 1)];
    if negative {
        -value
    } else {
        value
    }
}

#[inline]
pub(crate) fn hash_name(name: &[u8]) -> u64 {
    xxh3_64(name)
}
