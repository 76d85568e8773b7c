//! Pattern model: validates and normalizes user-supplied patterns, and
//! exports the canonical fixed-layout descriptor used to embed a pattern in
//! the in-image header.

use serde::Deserialize;

use crate::carrier::{Channel, ImageMode};
use crate::error::{StegError, StegResult};

/// Which channels a pattern writes into, before being resolved against a
/// carrier's `ImageMode`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSpec {
  /// All of the image's channels except alpha, unless alpha was asked for
  /// explicitly elsewhere.
  Auto,
  /// Every channel in the image's declared order.
  All,
  /// An explicit, ordered subset.
  Explicit(Vec<ChannelName>),
}

/// Wire-friendly channel name, deserialized from lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
  R,
  G,
  B,
  A,
  L,
}

impl From<ChannelName> for Channel {
  fn from(n: ChannelName) -> Self {
    match n {
      ChannelName::R => Channel::R,
      ChannelName::G => Channel::G,
      ChannelName::B => Channel::B,
      ChannelName::A => Channel::A,
      ChannelName::L => Channel::L,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashCheck {
  None,
  Md5,
  Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
  None,
  Zlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancedRedundancy {
  None,
  ReedSolomon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionMode {
  BytePerByte,
  Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPosition {
  Start,
  End,
  Custom { x: u32, y: u32 },
}

/// User-supplied pattern configuration. Validated and resolved against a
/// carrier's `ImageMode` by [`Pattern::normalize`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pattern {
  #[serde(default = "ChannelSpec::default_auto")]
  pub channels: ChannelSpec,
  pub bit_frequency: u8,
  #[serde(default = "Pattern::default_byte_spacing")]
  pub byte_spacing: u32,
  #[serde(default)]
  pub offset: u32,
  #[serde(default = "Pattern::default_hash_check")]
  pub hash_check: HashCheck,
  #[serde(default = "Pattern::default_compression")]
  pub compression: Compression,
  #[serde(default = "Pattern::default_compression_strength")]
  pub compression_strength: u8,
  #[serde(default = "Pattern::default_advanced_redundancy")]
  pub advanced_redundancy: AdvancedRedundancy,
  #[serde(default = "Pattern::default_correction_factor")]
  pub advanced_redundancy_correction_factor: f32,
  #[serde(default = "Pattern::default_repetition")]
  pub repetitive_redundancy: u32,
  #[serde(default = "Pattern::default_repetition_mode")]
  pub repetitive_redundancy_mode: RepetitionMode,
  #[serde(default)]
  pub header: Option<HeaderPattern>,
}

/// The header's own, usually simpler, bit-placement pattern.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderPattern {
  #[serde(default = "HeaderPattern::default_enabled")]
  pub enabled: bool,
  #[serde(default = "HeaderPattern::default_true")]
  pub write_data_size: bool,
  #[serde(default = "HeaderPattern::default_true")]
  pub write_pattern: bool,
  #[serde(default = "HeaderPattern::default_position")]
  pub position: HeaderPosition,
  #[serde(default = "ChannelSpec::default_auto")]
  pub channels: ChannelSpec,
  #[serde(default = "HeaderPattern::default_bit_frequency")]
  pub bit_frequency: u8,
  #[serde(default = "Pattern::default_byte_spacing")]
  pub byte_spacing: u32,
  #[serde(default)]
  pub offset: u32,
  #[serde(default = "Pattern::default_repetition")]
  pub repetitive_redundancy: u32,
}

impl ChannelSpec {
  fn default_auto() -> Self {
    Self::Auto
  }
}

impl HeaderPattern {
  fn default_enabled() -> bool {
    false
  }
  fn default_true() -> bool {
    true
  }
  fn default_position() -> HeaderPosition {
    HeaderPosition::Start
  }
  fn default_bit_frequency() -> u8 {
    1
  }

  /// A conservative default header pattern: start of image, 1 bit per
  /// channel, no redundancy, channels=auto.
  #[must_use]
  pub fn default_header() -> Self {
    Self {
      enabled: true,
      write_data_size: true,
      write_pattern: true,
      position: HeaderPosition::Start,
      channels: ChannelSpec::Auto,
      bit_frequency: 1,
      byte_spacing: 1,
      offset: 0,
      repetitive_redundancy: 1,
    }
  }
}

impl Pattern {
  fn default_byte_spacing() -> u32 {
    1
  }
  fn default_hash_check() -> HashCheck {
    HashCheck::None
  }
  fn default_compression() -> Compression {
    Compression::None
  }
  fn default_compression_strength() -> u8 {
    6
  }
  fn default_advanced_redundancy() -> AdvancedRedundancy {
    AdvancedRedundancy::None
  }
  fn default_correction_factor() -> f32 {
    0.0
  }
  fn default_repetition() -> u32 {
    1
  }
  fn default_repetition_mode() -> RepetitionMode {
    RepetitionMode::BytePerByte
  }

  /// Parses a pattern from an untyped JSON-like dictionary, rejecting
  /// unknown keys (the typed equivalent of the original tool's dynamic
  /// configuration dictionary).
  pub fn from_dict(value: serde_json::Value) -> StegResult<Self> {
    serde_json::from_value(value)
      .map_err(|_| StegError::InvalidPattern("dictionary had unknown or mistyped keys"))
  }

  /// Validates ranges and resolves `channels` against `mode`, producing a
  /// pattern ready to drive a [`crate::slots::SlotIter`].
  pub fn normalize(&self, mode: ImageMode) -> StegResult<Normalized> {
    if self.bit_frequency == 0 || self.bit_frequency > 8 {
      return Err(StegError::InvalidPattern("bit_frequency must be in 1..=8"));
    }
    if self.byte_spacing == 0 {
      return Err(StegError::InvalidPattern("byte_spacing must be >= 1"));
    }
    if self.repetitive_redundancy == 0 {
      return Err(StegError::InvalidPattern("repetitive_redundancy must be >= 1"));
    }
    if !(0.0..=1.0).contains(&self.advanced_redundancy_correction_factor) {
      return Err(StegError::InvalidPattern("advanced_redundancy_correction_factor must be in [0,1]"));
    }
    if self.compression_strength > 9 {
      return Err(StegError::InvalidPattern("compression_strength must be in 0..=9"));
    }
    let channels = resolve_channels(&self.channels, mode)?;
    Ok(Normalized { channels, source: self.clone() })
  }
}

fn resolve_channels(spec: &ChannelSpec, mode: ImageMode) -> StegResult<Vec<Channel>> {
  match spec {
    ChannelSpec::Auto => Ok(mode.channels().iter().copied().filter(|c| *c != Channel::A).collect()),
    ChannelSpec::All => Ok(mode.channels().to_vec()),
    ChannelSpec::Explicit(names) => {
      if names.is_empty() {
        return Err(StegError::InvalidPattern("channels set must be nonempty"));
      }
      let mut out = Vec::with_capacity(names.len());
      for name in names {
        let ch = Channel::from(*name);
        if ch.index_in(mode).is_none() {
          return Err(StegError::InvalidPattern("requested channel does not exist in carrier image mode"));
        }
        out.push(ch);
      }
      Ok(out)
    }
  }
}

/// A [`Pattern`] with its channel set resolved against a concrete
/// [`ImageMode`], ready for slot iteration and framing.
#[derive(Debug, Clone)]
pub struct Normalized {
  pub channels: Vec<Channel>,
  pub source: Pattern,
}

impl Normalized {
  #[inline]
  #[must_use]
  pub fn bit_frequency(&self) -> u32 {
    u32::from(self.source.bit_frequency)
  }

  #[inline]
  #[must_use]
  pub fn byte_spacing(&self) -> u32 {
    self.source.byte_spacing
  }

  #[inline]
  #[must_use]
  pub fn offset(&self) -> u32 {
    self.source.offset
  }

  /// Bits a single pixel visit contributes: `|channels| * bit_frequency`.
  #[inline]
  #[must_use]
  pub fn bits_per_pixel_visit(&self) -> u32 {
    self.channels.len() as u32 * self.bit_frequency()
  }

  /// Per-byte pixel cursor advance, per the edge policy in the slot
  /// iterator's ordering rule.
  #[inline]
  #[must_use]
  pub fn pixel_advance_per_byte(&self) -> u32 {
    let bpv = self.bits_per_pixel_visit();
    if bpv == 0 {
      return self.byte_spacing();
    }
    let pixels_for_byte = (8 + bpv - 1) / bpv;
    self.byte_spacing().max(pixels_for_byte)
  }
}

/// The canonical, fixed little-endian layout of a pattern descriptor (§6),
/// for embedding in the in-image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternDescriptor {
  pub channel_mask: u8,
  pub bit_frequency: u8,
  pub byte_spacing: u16,
  pub offset: u32,
  pub hash_check: u8,
  pub compression: u8,
  pub compression_strength: u8,
  pub advanced_redundancy: u8,
  pub rs_correction_factor_q16: u16,
  pub repetitive_redundancy: u8,
  pub repetitive_redundancy_mode: u8,
}

pub const PATTERN_DESCRIPTOR_LEN: usize = 16;

impl PatternDescriptor {
  #[must_use]
  pub fn from_normalized(n: &Normalized) -> Self {
    let channel_mask = n.channels.iter().fold(0u8, |acc, c| acc | c.mask_bit());
    Self {
      channel_mask,
      bit_frequency: n.source.bit_frequency,
      byte_spacing: n.source.byte_spacing.min(u32::from(u16::MAX)) as u16,
      offset: n.source.offset,
      hash_check: match n.source.hash_check {
        HashCheck::None => 0,
        HashCheck::Md5 => 1,
        HashCheck::Sha256 => 2,
      },
      compression: match n.source.compression {
        Compression::None => 0,
        Compression::Zlib => 1,
      },
      compression_strength: n.source.compression_strength,
      advanced_redundancy: match n.source.advanced_redundancy {
        AdvancedRedundancy::None => 0,
        AdvancedRedundancy::ReedSolomon => 1,
      },
      rs_correction_factor_q16: (n.source.advanced_redundancy_correction_factor.clamp(0.0, 1.0)
        * f32::from(u16::MAX))
      .round() as u16,
      repetitive_redundancy: n.source.repetitive_redundancy.min(u32::from(u8::MAX)) as u8,
      repetitive_redundancy_mode: match n.source.repetitive_redundancy_mode {
        RepetitionMode::BytePerByte => 0,
        RepetitionMode::Block => 1,
      },
    }
  }

  #[must_use]
  pub fn to_bytes(self) -> [u8; PATTERN_DESCRIPTOR_LEN] {
    let mut out = [0u8; PATTERN_DESCRIPTOR_LEN];
    out[0] = self.channel_mask;
    out[1] = self.bit_frequency;
    out[2..4].copy_from_slice(&self.byte_spacing.to_le_bytes());
    out[4..8].copy_from_slice(&self.offset.to_le_bytes());
    out[8] = self.hash_check;
    out[9] = self.compression;
    out[10] = self.compression_strength;
    out[11] = self.advanced_redundancy;
    out[12..14].copy_from_slice(&self.rs_correction_factor_q16.to_le_bytes());
    out[14] = self.repetitive_redundancy;
    out[15] = self.repetitive_redundancy_mode;
    out
  }

  pub fn from_bytes(bytes: &[u8]) -> StegResult<Self> {
    if bytes.len() < PATTERN_DESCRIPTOR_LEN {
      return Err(StegError::HeaderCorrupt);
    }
    Ok(Self {
      channel_mask: bytes[0],
      bit_frequency: bytes[1],
      byte_spacing: u16::from_le_bytes([bytes[2], bytes[3]]),
      offset: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
      hash_check: bytes[8],
      compression: bytes[9],
      compression_strength: bytes[10],
      advanced_redundancy: bytes[11],
      rs_correction_factor_q16: u16::from_le_bytes([bytes[12], bytes[13]]),
      repetitive_redundancy: bytes[14],
      repetitive_redundancy_mode: bytes[15],
    })
  }

  /// Reconstructs a concrete [`Normalized`] pattern from this descriptor,
  /// against a given carrier mode. This is how a decoder recovers the data
  /// pattern from an in-image header without any out-of-band knowledge.
  pub fn to_normalized(self, mode: ImageMode) -> StegResult<Normalized> {
    let mut channels = Vec::new();
    for (bit, ch) in [
      (1u8, Channel::R),
      (2, Channel::G),
      (4, Channel::B),
      (8, Channel::A),
      (16, Channel::L),
    ] {
      if self.channel_mask & bit != 0 {
        if ch.index_in(mode).is_none() {
          return Err(StegError::InvalidPattern("header pattern names a channel absent from carrier"));
        }
        channels.push(ch);
      }
    }
    if channels.is_empty() {
      return Err(StegError::InvalidPattern("header pattern has no channels"));
    }
    let source = Pattern {
      channels: ChannelSpec::Explicit(
        channels
          .iter()
          .map(|c| match c {
            Channel::R => ChannelName::R,
            Channel::G => ChannelName::G,
            Channel::B => ChannelName::B,
            Channel::A => ChannelName::A,
            Channel::L => ChannelName::L,
          })
          .collect(),
      ),
      bit_frequency: self.bit_frequency,
      byte_spacing: u32::from(self.byte_spacing),
      offset: self.offset,
      hash_check: match self.hash_check {
        1 => HashCheck::Md5,
        2 => HashCheck::Sha256,
        _ => HashCheck::None,
      },
      compression: match self.compression {
        1 => Compression::Zlib,
        _ => Compression::None,
      },
      compression_strength: self.compression_strength,
      advanced_redundancy: match self.advanced_redundancy {
        1 => AdvancedRedundancy::ReedSolomon,
        _ => AdvancedRedundancy::None,
      },
      advanced_redundancy_correction_factor: f32::from(self.rs_correction_factor_q16)
        / f32::from(u16::MAX),
      repetitive_redundancy: u32::from(self.repetitive_redundancy.max(1)),
      repetitive_redundancy_mode: match self.repetitive_redundancy_mode {
        1 => RepetitionMode::Block,
        _ => RepetitionMode::BytePerByte,
      },
      header: None,
    };
    Ok(Normalized { channels, source })
  }
}
