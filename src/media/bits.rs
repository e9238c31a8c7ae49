//! Bit-level reader for codec parameter sets
//!
//! Byte-aligned fields are read with [`bytes::Buf`]; this reader covers the
//! bit-packed ones (AudioSpecificConfig, the Exp-Golomb fields of an H.264
//! SPS). Reading past the end never fails: it sets a sticky overrun flag and
//! every read from then on yields 0, so malformed extradata degrades to zeroed
//! fields instead of aborting the caller.

/// MSB-first bit cursor over a byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute bit position
    pos: usize,
    overrun: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            overrun: false,
        }
    }

    /// True once any read went past the end
    pub fn has_error(&self) -> bool {
        self.overrun
    }

    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// Read up to 32 bits as an unsigned value
    pub fn read(&mut self, bits: u32) -> u32 {
        debug_assert!(bits <= 32);
        let mut value: u32 = 0;
        for _ in 0..bits {
            value = (value << 1) | self.read_bit();
        }
        if self.overrun {
            0
        } else {
            value
        }
    }

    pub fn read_bool(&mut self) -> bool {
        self.read(1) == 1
    }

    pub fn skip(&mut self, bits: u32) {
        for _ in 0..bits {
            self.read_bit();
        }
    }

    /// Unsigned Exp-Golomb: n leading zeros, a 1, then n bits
    pub fn read_golomb(&mut self) -> u32 {
        let mut zeros = 0u32;
        while !self.overrun && self.read_bit() == 0 {
            zeros += 1;
            if zeros > 31 {
                self.overrun = true;
            }
        }
        if self.overrun {
            return 0;
        }
        let suffix = self.read(zeros) as u64;
        if self.overrun {
            return 0;
        }
        ((1u64 << zeros) + suffix - 1) as u32
    }

    /// Signed Exp-Golomb: 1, 2, 3, 4 ... maps to 1, -1, 2, -2 ...
    pub fn read_signed_golomb(&mut self) -> i32 {
        let k = self.read_golomb() as i64;
        if k % 2 == 1 {
            ((k + 1) / 2) as i32
        } else {
            (-(k / 2)) as i32
        }
    }

    fn read_bit(&mut self) -> u32 {
        if self.overrun {
            return 0;
        }
        let byte = self.pos / 8;
        if byte >= self.data.len() {
            self.overrun = true;
            return 0;
        }
        let bit = (self.data[byte] >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        bit as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_fields() {
        // 0x12 0x10 = 00010 0100 0010 000
        let mut r = BitReader::new(&[0x12, 0x10]);
        assert_eq!(r.read(5), 2);
        assert_eq!(r.read(4), 4);
        assert_eq!(r.read(4), 2);
        assert_eq!(r.bits_left(), 3);
        assert!(!r.has_error());
    }

    #[test]
    fn test_golomb() {
        // 1 | 010 | 011 | 00100 | 00101 -> 0, 1, 2, 3, 4
        let mut r = BitReader::new(&[0b1010_0110, 0b0100_0010, 0b1000_0000]);
        let values: Vec<u32> = (0..5).map(|_| r.read_golomb()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(!r.has_error());
    }

    #[test]
    fn test_signed_golomb() {
        // 010 | 011 | 00100 -> 1, -1, 2
        let mut r = BitReader::new(&[0b0100_1100, 0b1000_0000]);
        assert_eq!(r.read_signed_golomb(), 1);
        assert_eq!(r.read_signed_golomb(), -1);
        assert_eq!(r.read_signed_golomb(), 2);
    }

    #[test]
    fn test_overrun_is_sticky() {
        let mut r = BitReader::new(&[0xFF]);
        assert_eq!(r.read(4), 0xF);
        assert_eq!(r.read(8), 0);
        assert!(r.has_error());
        // still zero even though nothing is left to misread
        assert_eq!(r.read(1), 0);
        assert_eq!(r.read_golomb(), 0);
    }

    #[test]
    fn test_golomb_all_zero_input() {
        let mut r = BitReader::new(&[0, 0, 0, 0, 0]);
        assert_eq!(r.read_golomb(), 0);
        assert!(r.has_error());
    }

    #[test]
    fn test_empty() {
        let mut r = BitReader::new(&[]);
        assert!(!r.read_bool());
        assert!(r.has_error());
    }
}
