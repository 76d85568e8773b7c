//! Header codec: the self-describing in-image preamble. Records the framed
//! payload length and (optionally) the data pattern, under its own CRC-16
//! checked, fixed-field layout, so a decoder with no out-of-band knowledge
//! can still recover the payload.

use crate::carrier::ImageMode;
use crate::error::{StegError, StegResult};
use crate::pattern::{
  AdvancedRedundancy, Compression, HashCheck, HeaderPattern, HeaderPosition, Normalized, PatternDescriptor,
  PATTERN_DESCRIPTOR_LEN,
};
use crate::slots::pixels_for_bits;

pub const MAGIC: [u8; 4] = *b"STEG";
pub const VERSION: u8 = 1;

const FLAG_WRITE_DATA_SIZE: u8 = 1 << 0;
const FLAG_WRITE_PATTERN: u8 = 1 << 1;
const FLAG_HASH_PRESENT: u8 = 1 << 2;
const FLAG_COMPRESSION_PRESENT: u8 = 1 << 3;
const FLAG_RS_PRESENT: u8 = 1 << 4;

/// A parsed (or about-to-be-written) header frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
  pub write_data_size: bool,
  pub write_pattern: bool,
  pub hash_present: bool,
  pub compression_present: bool,
  pub rs_present: bool,
  /// Framed body length (pre Reed-Solomon, pre repetition), zero if
  /// `write_data_size` is false.
  pub payload_length: u32,
  pub pattern_descriptor: Option<PatternDescriptor>,
}

impl Header {
  /// Builds a header describing `data_pattern`'s framing choices and the
  /// given framed body length.
  #[must_use]
  pub fn new(data_pattern: &Normalized, payload_length: u32, write_data_size: bool, write_pattern: bool) -> Self {
    let source = &data_pattern.source;
    Self {
      write_data_size,
      write_pattern,
      hash_present: source.hash_check != HashCheck::None,
      compression_present: source.compression != Compression::None,
      rs_present: source.advanced_redundancy != AdvancedRedundancy::None,
      payload_length,
      pattern_descriptor: if write_pattern { Some(PatternDescriptor::from_normalized(data_pattern)) } else { None },
    }
  }

  fn flags(&self) -> u8 {
    let mut flags = 0;
    if self.write_data_size {
      flags |= FLAG_WRITE_DATA_SIZE;
    }
    if self.write_pattern {
      flags |= FLAG_WRITE_PATTERN;
    }
    if self.hash_present {
      flags |= FLAG_HASH_PRESENT;
    }
    if self.compression_present {
      flags |= FLAG_COMPRESSION_PRESENT;
    }
    if self.rs_present {
      flags |= FLAG_RS_PRESENT;
    }
    flags
  }

  /// Serializes this header to its fixed-field byte layout, CRC-16 trailer
  /// included.
  #[must_use]
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + PATTERN_DESCRIPTOR_LEN + 2);
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(self.flags());
    let payload_len_field = if self.write_data_size { self.payload_length } else { 0 };
    out.extend_from_slice(&payload_len_field.to_le_bytes());

    let descriptor_bytes = self.pattern_descriptor.filter(|_| self.write_pattern).map(PatternDescriptor::to_bytes);
    let lp = descriptor_bytes.as_ref().map_or(0u16, |_| PATTERN_DESCRIPTOR_LEN as u16);
    out.extend_from_slice(&lp.to_le_bytes());
    if let Some(bytes) = descriptor_bytes {
      out.extend_from_slice(&bytes);
    }

    let crc = crc16_ccitt(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
  }

  /// Parses a header from its byte layout, validating magic, version and
  /// CRC-16. `bytes` may be longer than the header; only the prefix is used.
  pub fn from_bytes(bytes: &[u8]) -> StegResult<Self> {
    if bytes.len() < 12 || bytes[0..4] != MAGIC {
      return Err(StegError::HeaderCorrupt);
    }
    let version = bytes[4];
    if version != VERSION {
      return Err(StegError::HeaderCorrupt);
    }
    let flags = bytes[5];
    let payload_length = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
    let lp = u16::from_le_bytes(bytes[10..12].try_into().unwrap()) as usize;
    let total_len = 12 + lp + 2;
    if bytes.len() < total_len {
      return Err(StegError::HeaderCorrupt);
    }

    let body = &bytes[..12 + lp];
    let crc_expected = crc16_ccitt(body);
    let crc_actual = u16::from_le_bytes(bytes[12 + lp..14 + lp].try_into().unwrap());
    if crc_expected != crc_actual {
      return Err(StegError::HeaderCorrupt);
    }

    let write_pattern = flags & FLAG_WRITE_PATTERN != 0;
    let pattern_descriptor = if write_pattern && lp >= PATTERN_DESCRIPTOR_LEN {
      Some(PatternDescriptor::from_bytes(&bytes[12..12 + lp])?)
    } else {
      None
    };

    Ok(Self {
      write_data_size: flags & FLAG_WRITE_DATA_SIZE != 0,
      write_pattern,
      hash_present: flags & FLAG_HASH_PRESENT != 0,
      compression_present: flags & FLAG_COMPRESSION_PRESENT != 0,
      rs_present: flags & FLAG_RS_PRESENT != 0,
      payload_length,
      pattern_descriptor,
    })
  }

  #[inline]
  #[must_use]
  pub fn byte_len(&self) -> usize {
    let lp = if self.write_pattern { PATTERN_DESCRIPTOR_LEN } else { 0 };
    12 + lp + 2
  }
}

/// Resolves where (as a linear pixel offset) a header pattern should start
/// writing, given the carrier geometry and the header's own placement.
pub fn header_pixel_offset(
  position: HeaderPosition,
  width: u32,
  height: u32,
  header_normalized: &Normalized,
  header_byte_len: usize,
) -> StegResult<u32> {
  match position {
    HeaderPosition::Start => Ok(0),
    HeaderPosition::Custom { x, y } => Ok(y.saturating_mul(width).saturating_add(x)),
    HeaderPosition::End => {
      let mut at_zero = header_normalized.clone();
      at_zero.source.offset = 0;
      let pixels = pixels_for_bits(width, height, &at_zero, header_byte_len as u64 * 8)?;
      Ok((width as u64 * height as u64).saturating_sub(u64::from(pixels)) as u32)
    }
  }
}

/// Builds the header pattern used for writing/reading the header frame
/// itself, honouring a caller-supplied [`HeaderPattern`] or falling back to
/// the conservative default.
pub fn header_data_pattern(header: Option<&HeaderPattern>, mode: ImageMode) -> StegResult<Normalized> {
  let header = header.cloned().unwrap_or_else(HeaderPattern::default_header);
  crate::pattern::Pattern {
    channels: header.channels,
    bit_frequency: header.bit_frequency,
    byte_spacing: header.byte_spacing,
    offset: header.offset,
    hash_check: HashCheck::None,
    compression: Compression::None,
    compression_strength: 6,
    advanced_redundancy: AdvancedRedundancy::None,
    advanced_redundancy_correction_factor: 0.0,
    repetitive_redundancy: header.repetitive_redundancy,
    repetitive_redundancy_mode: crate::pattern::RepetitionMode::BytePerByte,
    header: None,
  }
  .normalize(mode)
}

const fn make_crc16_table() -> [u16; 256] {
  let mut out = [0u16; 256];
  let mut n = 0;
  while n < 256 {
    let mut c = (n as u16) << 8;
    let mut k = 0;
    while k < 8 {
      if (c & 0x8000) != 0 {
        c = (c << 1) ^ 0x1021;
      } else {
        c <<= 1;
      }
      k += 1;
    }
    out[n] = c;
    n += 1;
  }
  out
}

const CRC16_TABLE: [u16; 256] = make_crc16_table();

fn update_crc16(mut crc: u16, iter: impl Iterator<Item = u8>) -> u16 {
  for byte in iter {
    let i = ((crc >> 8) ^ u16::from(byte)) as u8 as usize;
    crc = (crc << 8) ^ CRC16_TABLE[i];
  }
  crc
}

/// CRC-16-CCITT (poly `0x1021`, init `0xFFFF`, no reflection, no xorout).
#[must_use]
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
  update_crc16(0xFFFF, bytes.iter().copied())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pattern::{ChannelSpec, Pattern, RepetitionMode};

  fn data_pattern() -> Normalized {
    Pattern {
      channels: ChannelSpec::All,
      bit_frequency: 2,
      byte_spacing: 1,
      offset: 0,
      hash_check: HashCheck::Sha256,
      compression: Compression::Zlib,
      compression_strength: 6,
      advanced_redundancy: AdvancedRedundancy::ReedSolomon,
      advanced_redundancy_correction_factor: 0.2,
      repetitive_redundancy: 3,
      repetitive_redundancy_mode: RepetitionMode::Block,
      header: None,
    }
    .normalize(ImageMode::Rgba)
    .unwrap()
  }

  #[test]
  fn crc16_matches_known_vector() {
    // "123456789" is the standard CRC-16/CCITT-FALSE check string, whose
    // checksum is the well-known 0x29B1.
    assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
  }

  #[test]
  fn header_roundtrips_through_bytes() {
    let pattern = data_pattern();
    let header = Header::new(&pattern, 42, true, true);
    let bytes = header.to_bytes();
    let parsed = Header::from_bytes(&bytes).unwrap();
    assert_eq!(header, parsed);
    assert_eq!(parsed.payload_length, 42);
    assert!(parsed.hash_present && parsed.compression_present && parsed.rs_present);
  }

  #[test]
  fn header_without_pattern_has_no_descriptor() {
    let pattern = data_pattern();
    let header = Header::new(&pattern, 7, true, false);
    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), 14);
    let parsed = Header::from_bytes(&bytes).unwrap();
    assert!(parsed.pattern_descriptor.is_none());
  }

  #[test]
  fn corrupted_header_fails_crc() {
    let pattern = data_pattern();
    let header = Header::new(&pattern, 7, true, true);
    let mut bytes = header.to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(matches!(Header::from_bytes(&bytes), Err(StegError::HeaderCorrupt)));
  }

  #[test]
  fn wrong_magic_is_rejected() {
    let mut bytes = Header::new(&data_pattern(), 1, true, true).to_bytes();
    bytes[0] = b'X';
    assert!(matches!(Header::from_bytes(&bytes), Err(StegError::HeaderCorrupt)));
  }
}
