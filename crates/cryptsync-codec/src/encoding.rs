//! Text encodings for encrypted name bytes
//!
//! Encrypted names are arbitrary bytes and must be turned into text that is
//! legal in a file name and survives case-insensitive file systems.

/// Bits carried by one compact code point
pub const COMPACT_GROUP_BITS: u32 = 13;

/// Primary compact base (CJK Unified Ideographs)
pub const COMPACT_PRIMARY_BASE: u32 = 0x4E00;

/// Alternate compact base (Hangul Syllables)
pub const COMPACT_ALTERNATE_BASE: u32 = 0xAC00;

const GROUP_COUNT: u32 = 1 << COMPACT_GROUP_BITS;
const GROUP_MASK: u32 = GROUP_COUNT - 1;

/// Byte-to-text encoding for encrypted name segments
pub trait NameTextEncoding {
    /// Encode bytes as file-name-safe text
    fn encode(&self, bytes: &[u8]) -> String;

    /// Decode text, `None` when it is not a valid encoding
    fn decode(&self, text: &str) -> Option<Vec<u8>>;
}

/// Upper-case hexadecimal, two characters per byte
#[derive(Debug, Clone, Copy, Default)]
pub struct HexEncoding;

impl NameTextEncoding for HexEncoding {
    fn encode(&self, bytes: &[u8]) -> String {
        hex::encode_upper(bytes)
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        hex::decode(text).ok()
    }
}

/// Packs 13 bits into each code point of a caseless script block
///
/// The stream is closed by a flag code point `base + 8192 + n`, where `n` is
/// the number of bits held by the last data code point.
#[derive(Debug, Clone, Copy)]
pub struct CompactEncoding {
    base: u32,
}

impl CompactEncoding {
    /// Encoding over the CJK block
    pub const fn primary() -> Self {
        Self {
            base: COMPACT_PRIMARY_BASE,
        }
    }

    /// Encoding over the Hangul block
    pub const fn alternate() -> Self {
        Self {
            base: COMPACT_ALTERNATE_BASE,
        }
    }

    fn push(&self, out: &mut String, value: u32) {
        if let Some(c) = char::from_u32(self.base + value) {
            out.push(c);
        }
    }
}

impl Default for CompactEncoding {
    fn default() -> Self {
        Self::primary()
    }
}

impl NameTextEncoding for CompactEncoding {
    fn encode(&self, bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len() * 8 / 13 * 3 + 6);
        let mut acc: u32 = 0;
        let mut pending: u32 = 0;
        let mut last_bits: u32 = 0;

        for &byte in bytes {
            acc = (acc << 8) | u32::from(byte);
            pending += 8;
            while pending >= COMPACT_GROUP_BITS {
                pending -= COMPACT_GROUP_BITS;
                self.push(&mut out, (acc >> pending) & GROUP_MASK);
                acc &= (1 << pending) - 1;
                last_bits = COMPACT_GROUP_BITS;
            }
        }

        if pending > 0 {
            self.push(&mut out, acc);
            last_bits = pending;
        }
        self.push(&mut out, GROUP_COUNT + last_bits);
        out
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        let values: Vec<u32> = text
            .chars()
            .map(|c| u32::from(c).checked_sub(self.base))
            .collect::<Option<_>>()?;
        let (&flag, groups) = values.split_last()?;
        let last_bits = flag.checked_sub(GROUP_COUNT)?;
        if last_bits > COMPACT_GROUP_BITS || (groups.is_empty() != (last_bits == 0)) {
            return None;
        }

        let mut out = Vec::with_capacity(groups.len() * 13 / 8 + 1);
        let mut acc: u32 = 0;
        let mut pending: u32 = 0;
        for (index, &group) in groups.iter().enumerate() {
            let width = if index + 1 == groups.len() {
                last_bits
            } else {
                COMPACT_GROUP_BITS
            };
            if group >= (1 << width) {
                return None;
            }
            acc = (acc << width) | group;
            pending += width;
            while pending >= 8 {
                pending -= 8;
                out.push(((acc >> pending) & 0xFF) as u8);
                acc &= (1 << pending) - 1;
            }
        }

        if pending != 0 {
            return None;
        }
        Some(out)
    }
}
