use super::decode::TrackError;

/// Longest variable-length quantity a standard MIDI file may contain.
const MAX_VARINT_BYTES: usize = 4;

/// Forward-only cursor over a byte slice with big-endian field readers.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Step back over the byte just read (running-status data byte).
    pub fn unread(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, TrackError> {
        let byte = self.peek().ok_or(TrackError::Truncated {
            offset: self.pos,
            wanted: 1,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TrackError> {
        if self.remaining() < len {
            return Err(TrackError::Truncated {
                offset: self.pos,
                wanted: len,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, TrackError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, TrackError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a variable-length quantity: base-128 digits, most significant
    /// first, high bit set on every byte but the last.
    pub fn read_varint(&mut self) -> Result<u32, TrackError> {
        let start = self.pos;
        let mut value: u32 = 0;
        for _ in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8().map_err(|_| TrackError::Truncated {
                offset: start,
                wanted: self.pos - start + 1,
            })?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(TrackError::VarintTooLong { offset: start })
    }
}

/// Encode a variable-length quantity.
pub fn encode_varint(mut value: u32) -> Vec<u8> {
    let mut out = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        out.insert(0, 0x80 | (value & 0x7F) as u8);
        value >>= 7;
    }
    out
}

/// Decode a 14-bit quantity stored as (lsb, msb) 7-bit pair.
pub fn read_14_bit(lsb: u8, msb: u8) -> u16 {
    u16::from(lsb & 0x7F) | (u16::from(msb & 0x7F) << 7)
}

/// Encode a 14-bit quantity into a (lsb, msb) 7-bit pair.
pub fn write_14_bit(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

/// Decode a 24-bit big-endian quantity (tempo payload).
pub fn read_u24_be(bytes: [u8; 3]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}
