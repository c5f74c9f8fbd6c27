//! Byte codec (C1): endian-aware integer read/write and the tiny
//! format-string grammar the protocol handler encodes/decodes frames with.

pub mod text;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::errors::{CodecError, CodecResult};

/// Session-wide decoding parameters, assigned exactly once from the first
/// CONFIGURATION frame (spec.md invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteConfig {
    pub cpointer_size: u8,
    pub little_endian: bool,
}

impl ByteConfig {
    /// Build a config, validating that the pointer size is one the wire
    /// format actually supports.
    pub fn new(cpointer_size: u8, little_endian: bool) -> CodecResult<Self> {
        if cpointer_size != 2 && cpointer_size != 4 {
            return Err(CodecError::UnsupportedPointerSize(cpointer_size as usize));
        }
        Ok(Self {
            cpointer_size,
            little_endian,
        })
    }

    fn width_of(&self, fmt: char) -> CodecResult<usize> {
        match fmt {
            'B' => Ok(1),
            'I' => Ok(4),
            'C' => Ok(self.cpointer_size as usize),
            other => Err(CodecError::UnknownFormatChar(other)),
        }
    }

    /// Total byte length encoded/decoded by a format string.
    pub fn size(&self, fmt: &str) -> CodecResult<usize> {
        fmt.chars().try_fold(0usize, |acc, c| Ok(acc + self.width_of(c)?))
    }

    /// Encode `values` (one per format character) into a freshly allocated
    /// buffer of exactly `size(fmt)` bytes.
    pub fn encode(&self, fmt: &str, values: &[u32]) -> CodecResult<Vec<u8>> {
        let chars: Vec<char> = fmt.chars().collect();
        if chars.len() != values.len() {
            return Err(CodecError::ValueCountMismatch {
                expected: chars.len(),
                got: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.size(fmt)?);
        for (c, &value) in chars.iter().zip(values.iter()) {
            self.encode_one(*c, value, &mut out)?;
        }
        Ok(out)
    }

    fn encode_one(&self, fmt: char, value: u32, out: &mut Vec<u8>) -> CodecResult<()> {
        match fmt {
            'B' => {
                if value > u32::from(u8::MAX) {
                    return Err(CodecError::ValueOutOfRange {
                        fmt,
                        value: i64::from(value),
                    });
                }
                out.push(value as u8);
                Ok(())
            }
            'I' => {
                let mut buf = [0u8; 4];
                if self.little_endian {
                    LittleEndian::write_u32(&mut buf, value);
                } else {
                    BigEndian::write_u32(&mut buf, value);
                }
                out.extend_from_slice(&buf);
                Ok(())
            }
            'C' => {
                if self.cpointer_size == 2 {
                    if value > u32::from(u16::MAX) {
                        return Err(CodecError::ValueOutOfRange {
                            fmt,
                            value: i64::from(value),
                        });
                    }
                    let mut buf = [0u8; 2];
                    if self.little_endian {
                        LittleEndian::write_u16(&mut buf, value as u16);
                    } else {
                        BigEndian::write_u16(&mut buf, value as u16);
                    }
                    out.extend_from_slice(&buf);
                } else {
                    let mut buf = [0u8; 4];
                    if self.little_endian {
                        LittleEndian::write_u32(&mut buf, value);
                    } else {
                        BigEndian::write_u32(&mut buf, value);
                    }
                    out.extend_from_slice(&buf);
                }
                Ok(())
            }
            other => Err(CodecError::UnknownFormatChar(other)),
        }
    }

    /// Decode the values named by `fmt` out of `bytes` starting at `offset`.
    pub fn decode(&self, fmt: &str, bytes: &[u8], offset: usize) -> CodecResult<Vec<u32>> {
        let mut pos = offset;
        let mut out = Vec::with_capacity(fmt.chars().count());
        for c in fmt.chars() {
            let width = self.width_of(c)?;
            if bytes.len() < pos + width {
                return Err(CodecError::BufferTooShort {
                    need: pos + width,
                    have: bytes.len(),
                });
            }
            let slice = &bytes[pos..pos + width];
            let value = match c {
                'B' => u32::from(slice[0]),
                'I' => {
                    if self.little_endian {
                        LittleEndian::read_u32(slice)
                    } else {
                        BigEndian::read_u32(slice)
                    }
                }
                'C' if self.cpointer_size == 2 => {
                    u32::from(if self.little_endian {
                        LittleEndian::read_u16(slice)
                    } else {
                        BigEndian::read_u16(slice)
                    })
                }
                'C' => {
                    if self.little_endian {
                        LittleEndian::read_u32(slice)
                    } else {
                        BigEndian::read_u32(slice)
                    }
                }
                other => return Err(CodecError::UnknownFormatChar(other)),
            };
            out.push(value);
            pos += width;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_sums_widths() {
        let cfg = ByteConfig::new(4, true).unwrap();
        assert_eq!(cfg.size("BBCI").unwrap(), 1 + 1 + 4 + 4);
        let cfg16 = ByteConfig::new(2, true).unwrap();
        assert_eq!(cfg16.size("BBCI").unwrap(), 1 + 1 + 2 + 4);
    }

    #[test]
    fn rejects_bad_pointer_size() {
        assert_eq!(
            ByteConfig::new(3, true).unwrap_err(),
            CodecError::UnsupportedPointerSize(3)
        );
    }

    #[test]
    fn round_trips_little_endian() {
        let cfg = ByteConfig::new(4, true).unwrap();
        let encoded = cfg.encode("BBCI", &[1, 0, 42, 0xdead_beef]).unwrap();
        let decoded = cfg.decode("BBCI", &encoded, 0).unwrap();
        assert_eq!(decoded, vec![1, 0, 42, 0xdead_beef]);
    }

    #[test]
    fn round_trips_big_endian_with_2byte_pointer() {
        let cfg = ByteConfig::new(2, false).unwrap();
        let encoded = cfg.encode("CI", &[0x1234, 0x89ab_cdef]).unwrap();
        assert_eq!(encoded, vec![0x12, 0x34, 0x89, 0xab, 0xcd, 0xef]);
        let decoded = cfg.decode("CI", &encoded, 0).unwrap();
        assert_eq!(decoded, vec![0x1234, 0x89ab_cdef]);
    }

    #[test]
    fn byte_out_of_range_fails() {
        let cfg = ByteConfig::new(4, true).unwrap();
        assert!(cfg.encode("B", &[256]).is_err());
    }

    #[test]
    fn short_buffer_fails_decode() {
        let cfg = ByteConfig::new(4, true).unwrap();
        assert!(cfg.decode("I", &[0, 0], 0).is_err());
    }

    #[test]
    fn value_count_mismatch_fails_encode() {
        let cfg = ByteConfig::new(4, true).unwrap();
        assert!(cfg.encode("BB", &[1]).is_err());
    }
}
