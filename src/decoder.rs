//! Decoder driver: recover a header (if present), resolve the data pattern,
//! and invert framing to recover the original payload.

use tracing::{instrument, warn};

use crate::bits::bytes_of;
use crate::carrier::Carrier;
use crate::error::{StegError, StegResult};
use crate::framing::{frame_decode, framed_len_bytes};
use crate::header::{header_data_pattern, header_pixel_offset, Header};
use crate::pattern::{HashCheck, HeaderPosition, Normalized, Pattern, PATTERN_DESCRIPTOR_LEN};
use crate::slots::read_bitstream;

/// Decode-time choices that aren't part of the pattern itself.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
  /// When a header is found and carries a pattern descriptor, prefer the
  /// caller-supplied `pattern` over it anyway.
  pub enforce_provided_pattern: bool,
  /// Framed body length, used when no header (or a header without
  /// `write_data_size`) supplies one.
  pub data_length: Option<u32>,
  /// Whether the quadratic hash-guided last-resort trimming mode (§4.H) may
  /// run when the length is otherwise unknown.
  pub allow_last_resort: bool,
}

impl Default for DecodeOptions {
  fn default() -> Self {
    Self { enforce_provided_pattern: false, data_length: None, allow_last_resort: true }
  }
}

const HEADER_PROBE_LEN: usize = 14 + PATTERN_DESCRIPTOR_LEN;

/// Attempts header recovery at `start`, then `end`, then the header
/// pattern's own configured position, in that order, returning the first
/// header whose CRC-16 checks out, the header pattern positioned at the
/// offset that worked, and whether that offset was `start` (which the data
/// pattern's own offset must then clear, mirroring the encoder).
fn try_decode_header(carrier: &Carrier, pattern: &Pattern) -> Option<(Header, Normalized, bool)> {
  let header_cfg = pattern.header.as_ref();
  let base = header_data_pattern(header_cfg, carrier.mode).ok()?;

  let mut candidates = vec![(0u32, true)];
  for probe_len in [14usize, HEADER_PROBE_LEN] {
    if let Ok(offset) = header_pixel_offset(HeaderPosition::End, carrier.width, carrier.height, &base, probe_len) {
      candidates.push((offset, false));
    }
  }
  if let Some(cfg) = header_cfg {
    if let HeaderPosition::Custom { x, y } = cfg.position {
      candidates.push((y.saturating_mul(carrier.width).saturating_add(x), false));
    }
  }

  for (offset, is_start) in candidates {
    let mut attempt = base.clone();
    attempt.source.offset = offset;
    let Ok(bits) = read_bitstream(carrier, &attempt, HEADER_PROBE_LEN * 8) else { continue };
    let (bytes, _) = bytes_of(&bits);
    if let Ok(header) = Header::from_bytes(&bytes) {
      return Some((header, attempt, is_start));
    }
  }
  None
}

/// The quadratic last-resort trimming mode (§4.H): read to the end of the
/// carrier's capacity, then shrink the candidate body length until a
/// hash-verified decode succeeds.
fn last_resort_decode(carrier: &Carrier, data_normalized: &Normalized) -> StegResult<Vec<u8>> {
  let capacity_bits = crate::slots::usable_bit_capacity(carrier.width, carrier.height, data_normalized);
  let max_bytes = (capacity_bits / 8) as usize;
  let bits = read_bitstream(carrier, data_normalized, max_bytes * 8)?;
  let (stream, _) = bytes_of(&bits);

  for candidate_body_len in (0..=stream.len()).rev() {
    let framed_len = framed_len_bytes(candidate_body_len, data_normalized);
    if framed_len > stream.len() {
      continue;
    }
    if let Ok(payload) = frame_decode(&stream[..framed_len], candidate_body_len, data_normalized) {
      return Ok(payload);
    }
  }
  Err(StegError::IntegrityFailure(Vec::new()))
}

/// Recovers the payload hidden in `carrier` under `pattern`.
#[instrument(skip(carrier), fields(width = carrier.width, height = carrier.height))]
pub fn decode(carrier: &Carrier, pattern: &Pattern, options: &DecodeOptions) -> StegResult<Vec<u8>> {
  let should_try_header = match &pattern.header {
    None => true,
    Some(header_pattern) => header_pattern.enabled,
  };
  let header = if should_try_header { try_decode_header(carrier, pattern) } else { None };

  let (data_normalized, body_len) = match &header {
    Some((header, header_normalized, is_start)) => {
      let mut data_normalized = if options.enforce_provided_pattern {
        pattern.normalize(carrier.mode)?
      } else if let Some(descriptor) = header.pattern_descriptor {
        descriptor.to_normalized(carrier.mode)?
      } else {
        pattern.normalize(carrier.mode)?
      };
      // Mirror the encoder: a header at the start of the image claims the
      // leading pixels, so the data pattern's slot sequence must begin
      // after them.
      if *is_start {
        let header_pixels =
          crate::slots::pixels_for_bits(carrier.width, carrier.height, header_normalized, header.byte_len() as u64 * 8)?;
        data_normalized.source.offset = data_normalized.source.offset.saturating_add(header_pixels);
      }
      let body_len =
        if header.write_data_size { Some(header.payload_length as usize) } else { options.data_length.map(|l| l as usize) };
      (data_normalized, body_len)
    }
    None => (pattern.normalize(carrier.mode)?, options.data_length.map(|l| l as usize)),
  };

  let body_len = match body_len {
    Some(len) => len,
    None => {
      if !options.allow_last_resort || data_normalized.source.hash_check == HashCheck::None {
        return Err(StegError::InvalidPattern(
          "payload length unknown and no hash available for last-resort trimming",
        ));
      }
      warn!("payload length unknown, falling back to hash-guided trimming");
      return last_resort_decode(carrier, &data_normalized);
    }
  };

  let framed_bits = framed_len_bytes(body_len, &data_normalized) as u64 * 8;
  let bits = read_bitstream(carrier, &data_normalized, framed_bits as usize)?;
  let (stream, _) = bytes_of(&bits);
  frame_decode(&stream, body_len, &data_normalized)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::carrier::ImageMode;
  use crate::encoder::encode;
  use crate::pattern::{AdvancedRedundancy, ChannelSpec, Compression, HeaderPattern, RepetitionMode};

  fn plain_pattern() -> Pattern {
    Pattern {
      channels: ChannelSpec::All,
      bit_frequency: 1,
      byte_spacing: 1,
      offset: 0,
      hash_check: HashCheck::None,
      compression: Compression::None,
      compression_strength: 6,
      advanced_redundancy: AdvancedRedundancy::None,
      advanced_redundancy_correction_factor: 0.0,
      repetitive_redundancy: 1,
      repetitive_redundancy_mode: RepetitionMode::BytePerByte,
      header: None,
    }
  }

  #[test]
  fn roundtrip_with_explicit_data_length() {
    let carrier = Carrier::new(ImageMode::Rgb, 8, 8, vec![100; 8 * 8 * 3]).unwrap();
    let pattern = plain_pattern();
    let encoded = encode(&carrier, &pattern, b"hello").unwrap();
    let options = DecodeOptions { data_length: Some(5), ..DecodeOptions::default() };
    let decoded = decode(&encoded, &pattern, &options).unwrap();
    assert_eq!(decoded, b"hello");
  }

  #[test]
  fn s5_header_idempotence_recovers_without_data_pattern() {
    let carrier = Carrier::new(ImageMode::Rgba, 24, 24, vec![50; 24 * 24 * 4]).unwrap();
    let mut data_pattern = plain_pattern();
    data_pattern.bit_frequency = 2;
    data_pattern.header = Some(HeaderPattern::default_header());
    let encoded = encode(&carrier, &data_pattern, b"payload").unwrap();

    let mut empty_pattern = plain_pattern();
    empty_pattern.header = Some(HeaderPattern::default_header());
    let decoded = decode(&encoded, &empty_pattern, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded, b"payload");
  }

  #[test]
  fn header_end_position_round_trips() {
    let carrier = Carrier::new(ImageMode::Rgba, 32, 32, vec![20; 32 * 32 * 4]).unwrap();
    let mut pattern = plain_pattern();
    pattern.header = Some(HeaderPattern { position: crate::pattern::HeaderPosition::End, ..HeaderPattern::default_header() });
    let encoded = encode(&carrier, &pattern, b"tail-end").unwrap();
    let decoded = decode(&encoded, &pattern, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded, b"tail-end");
  }

  #[test]
  fn header_custom_position_round_trips() {
    let carrier = Carrier::new(ImageMode::Rgba, 32, 32, vec![20; 32 * 32 * 4]).unwrap();
    let mut pattern = plain_pattern();
    pattern.header = Some(HeaderPattern {
      position: crate::pattern::HeaderPosition::Custom { x: 20, y: 20 },
      ..HeaderPattern::default_header()
    });
    let encoded = encode(&carrier, &pattern, b"custom!!").unwrap();
    let decoded = decode(&encoded, &pattern, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded, b"custom!!");
  }

  #[test]
  fn s3_repetition_tolerates_single_bit_flip() {
    let carrier = Carrier::new(ImageMode::Rgb, 8, 8, vec![10; 8 * 8 * 3]).unwrap();
    let mut pattern = plain_pattern();
    pattern.repetitive_redundancy = 3;
    pattern.repetitive_redundancy_mode = RepetitionMode::BytePerByte;
    let mut encoded = encode(&carrier, &pattern, b"A").unwrap();
    // flip the LSB of the first B channel sample.
    let b = encoded.sample(0, 0, crate::carrier::Channel::B).unwrap();
    encoded.set_sample(0, 0, crate::carrier::Channel::B, b ^ 1).unwrap();
    let options = DecodeOptions { data_length: Some(1), ..DecodeOptions::default() };
    let decoded = decode(&encoded, &pattern, &options).unwrap();
    assert_eq!(decoded, b"A");
  }

  #[test]
  fn s4_uncorrectable_corruption_surfaces_integrity_failure() {
    let carrier = Carrier::new(ImageMode::Rgb, 32, 32, vec![77; 32 * 32 * 3]).unwrap();
    let mut pattern = plain_pattern();
    pattern.hash_check = HashCheck::Md5;
    let mut encoded = encode(&carrier, &pattern, b"abc").unwrap();
    for x in 0..8 {
      let r = encoded.sample(x, 0, crate::carrier::Channel::R).unwrap();
      encoded.set_sample(x, 0, crate::carrier::Channel::R, r ^ 1).unwrap();
    }
    let options = DecodeOptions { data_length: Some(3), ..DecodeOptions::default() };
    let result = decode(&encoded, &pattern, &options);
    assert!(matches!(result, Err(StegError::IntegrityFailure(_))));
  }
}
