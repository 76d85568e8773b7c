//! Encoder driver: frame the payload, place the header (if any), verify
//! capacity, and write bits into a cloned carrier.

use tracing::{info, instrument};

use crate::carrier::Carrier;
use crate::error::{StegError, StegResult};
use crate::framing::frame_encode;
use crate::header::{header_data_pattern, header_pixel_offset, Header};
use crate::pattern::{HeaderPosition, Normalized, Pattern};
use crate::slots::{pixels_for_bits, usable_bit_capacity, write_bitstream};

/// The header's resolved slot pattern and serialized bytes, ready to write.
struct HeaderPlan {
  normalized: Normalized,
  bytes: Vec<u8>,
}

/// Hides `data` inside `carrier` under `pattern`, returning a new carrier
/// with the payload (and header, if `pattern.header` is enabled) written
/// into its samples. `carrier` itself is never mutated.
#[instrument(skip(carrier, data), fields(width = carrier.width, height = carrier.height, bytes = data.len()))]
pub fn encode(carrier: &Carrier, pattern: &Pattern, data: &[u8]) -> StegResult<Carrier> {
  let mut data_normalized = pattern.normalize(carrier.mode)?;
  let framed = frame_encode(data, &data_normalized);

  let header_plan = match &pattern.header {
    Some(header_pattern) if header_pattern.enabled => {
      let header_normalized = header_data_pattern(Some(header_pattern), carrier.mode)?;
      let header = Header::new(
        &data_normalized,
        u32::try_from(framed.body_len).map_err(|_| StegError::CapacityExceeded)?,
        header_pattern.write_data_size,
        header_pattern.write_pattern,
      );
      let header_bytes = header.to_bytes();
      let start = header_pixel_offset(
        header_pattern.position,
        carrier.width,
        carrier.height,
        &header_normalized,
        header_bytes.len(),
      )?;
      let mut positioned = header_normalized;
      positioned.source.offset = start;
      let end = pixels_for_bits(carrier.width, carrier.height, &positioned, header_bytes.len() as u64 * 8)?;

      match header_pattern.position {
        // The header "prepends" the payload: when it sits at the start of
        // the image, the data pattern's own offset must clear the pixels
        // the header just claimed, or the two slot sequences would
        // overlap.
        HeaderPosition::Start => {
          data_normalized.source.offset = data_normalized.source.offset.saturating_add(end);
        }
        // Elsewhere the header's pixel range can land anywhere the data
        // pattern's own sequence (still starting at its configured
        // offset) would otherwise visit too: the trailing pixels for
        // `End`, an arbitrary rectangle for `Custom`. The header is
        // written first, so a silent overlap would have the data write
        // clobber it. Refuse instead of corrupting.
        HeaderPosition::End | HeaderPosition::Custom { .. } => {
          let data_bits = framed.bytes.len() as u64 * 8;
          let data_end = pixels_for_bits(carrier.width, carrier.height, &data_normalized, data_bits)?;
          let data_start = data_normalized.source.offset;
          if data_start < end && start < data_end {
            return Err(StegError::CapacityExceeded);
          }
        }
      }

      Some(HeaderPlan { normalized: positioned, bytes: header_bytes })
    }
    _ => None,
  };

  if let Some(plan) = &header_plan {
    let needed = u64::try_from(plan.bytes.len()).unwrap() * 8;
    if usable_bit_capacity(carrier.width, carrier.height, &plan.normalized) < needed {
      return Err(StegError::CapacityExceeded);
    }
  }
  let data_bits_needed = framed.bytes.len() as u64 * 8;
  if usable_bit_capacity(carrier.width, carrier.height, &data_normalized) < data_bits_needed {
    return Err(StegError::CapacityExceeded);
  }

  let mut out = carrier.clone();
  if let Some(plan) = &header_plan {
    let header_bits = crate::bits::bits_of(&plan.bytes);
    write_bitstream(&mut out, &plan.normalized, &header_bits)?;
  }
  let data_bits = crate::bits::bits_of(&framed.bytes);
  write_bitstream(&mut out, &data_normalized, &data_bits)?;

  info!(framed_bytes = framed.bytes.len(), header = header_plan.is_some(), "payload encoded");
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::carrier::ImageMode;
  use crate::pattern::{AdvancedRedundancy, ChannelSpec, Compression, HashCheck, HeaderPattern, RepetitionMode};

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
  fn s1_writes_expected_lsbs() {
    let carrier = Carrier::new(ImageMode::Rgba, 4, 4, vec![128; 64]).unwrap();
    let pattern = Pattern {
      channels: ChannelSpec::Explicit(vec![
        crate::pattern::ChannelName::R,
        crate::pattern::ChannelName::G,
        crate::pattern::ChannelName::B,
      ]),
      ..plain_pattern()
    };
    let out = encode(&carrier, &pattern, b"Hi").unwrap();
    // "Hi" = 0x48 0x69 = 0100_1000 0110_1001, MSB first, across R,G,B,R,...
    let expected = [0, 1, 0, 0, 1, 0, 0, 0, 0, 1, 1, 0, 1, 0, 0, 1];
    let r0 = out.sample(0, 0, crate::carrier::Channel::R).unwrap() & 1;
    let g0 = out.sample(0, 0, crate::carrier::Channel::G).unwrap() & 1;
    let b0 = out.sample(0, 0, crate::carrier::Channel::B).unwrap() & 1;
    assert_eq!([r0 as u8, g0 as u8, b0 as u8], expected[0..3]);
  }

  #[test]
  fn rejects_oversized_payload_without_mutating() {
    let carrier = Carrier::new(ImageMode::Rgb, 2, 2, vec![0; 12]).unwrap();
    let pattern = plain_pattern();
    let result = encode(&carrier, &pattern, &[0u8; 64]);
    assert!(matches!(result, Err(StegError::CapacityExceeded)));
  }

  #[test]
  fn header_enabled_round_prepends_header() {
    let carrier = Carrier::new(ImageMode::Rgba, 16, 16, vec![10; 16 * 16 * 4]).unwrap();
    let mut pattern = plain_pattern();
    pattern.header = Some(HeaderPattern::default_header());
    let out = encode(&carrier, &pattern, b"payload").unwrap();
    assert_eq!(out.width, carrier.width);
    assert_ne!(out.samples, carrier.samples);
  }

  #[test]
  fn header_end_position_succeeds_when_clear_of_data() {
    let carrier = Carrier::new(ImageMode::Rgba, 32, 32, vec![20; 32 * 32 * 4]).unwrap();
    let mut pattern = plain_pattern();
    pattern.header = Some(HeaderPattern { position: HeaderPosition::End, ..HeaderPattern::default_header() });
    let out = encode(&carrier, &pattern, b"tail").unwrap();
    assert_ne!(out.samples, carrier.samples);
  }

  #[test]
  fn header_custom_position_succeeds_when_clear_of_data() {
    let carrier = Carrier::new(ImageMode::Rgba, 32, 32, vec![20; 32 * 32 * 4]).unwrap();
    let mut pattern = plain_pattern();
    pattern.header = Some(HeaderPattern { position: HeaderPosition::Custom { x: 20, y: 20 }, ..HeaderPattern::default_header() });
    let out = encode(&carrier, &pattern, b"custom!!").unwrap();
    assert_ne!(out.samples, carrier.samples);
  }

  #[test]
  fn header_end_position_rejects_overlap_instead_of_corrupting() {
    let carrier = Carrier::new(ImageMode::Rgb, 8, 8, vec![0; 8 * 8 * 3]).unwrap();
    let mut pattern = plain_pattern();

    // Figure out how large a payload can nearly saturate the image's own
    // raw capacity with no header at all.
    let normalized = pattern.normalize(carrier.mode).unwrap();
    let capacity_bits = crate::slots::usable_bit_capacity(carrier.width, carrier.height, &normalized);
    let payload = vec![0xAAu8; (capacity_bits / 8) as usize];
    assert!(encode(&carrier, &pattern, &payload).is_ok());

    // A header at `End` (kept small: no pattern descriptor) still reserves
    // trailing pixels the near-saturating payload above already needed.
    // The encoder must refuse rather than let the data write clobber it.
    pattern.header =
      Some(HeaderPattern { position: HeaderPosition::End, write_pattern: false, ..HeaderPattern::default_header() });
    let result = encode(&carrier, &pattern, &payload);
    assert!(matches!(result, Err(StegError::CapacityExceeded)));
  }
}
