/// Variable-length quantities are capped at four encoded bytes (28 bits).
/// A fifth continuation byte is left unread rather than folded in.
pub const MAX_VARLEN_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLen {
    pub value: u32,
    pub consumed: usize,
    /// The buffer ended while the continuation bit was still set.
    pub truncated: bool,
}

/// Decodes a variable-length quantity at `*cursor`, advancing the cursor.
///
/// Running off the end of `buf` yields the partial value with `truncated`
/// set and the cursor parked at `buf.len()`.
pub fn decode(buf: &[u8], cursor: &mut usize) -> VarLen {
    let mut value: u32 = 0;
    let mut consumed = 0;

    loop {
        let Some(&byte) = buf.get(*cursor) else {
            *cursor = buf.len();
            return VarLen {
                value,
                consumed,
                truncated: true,
            };
        };
        *cursor += 1;
        consumed += 1;
        value = (value << 7) | (byte & 0x7F) as u32;

        if byte & 0x80 == 0 || consumed >= MAX_VARLEN_BYTES {
            return VarLen {
                value,
                consumed,
                truncated: false,
            };
        }
    }
}

/// Encodes `value` (at most 28 bits are kept).
pub fn encode(value: u32) -> Vec<u8> {
    let value = value & 0x0FFF_FFFF;
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    groups.reverse();
    groups
}

/// Forward-only reader over one chunk or track payload.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    pub fn read_varlen(&mut self) -> VarLen {
        decode(self.data, &mut self.pos)
    }

    /// Takes `len` bytes, or `None` (cursor untouched) if fewer remain.
    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    pub fn exhaust(&mut self) {
        self.pos = self.data.len();
    }
}
