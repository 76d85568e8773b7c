use core::fmt;

/// An error from the [`stegacore`](crate) codec core.
///
/// `Uncorrectable` and `IntegrityFailure` carry the best-effort recovered
/// payload bytes so that a UI collaborator can present a partial result
/// instead of nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StegError {
  /// A pattern field was out of range, or named a channel the carrier
  /// doesn't have.
  InvalidPattern(&'static str),
  /// The carrier image's mode isn't one this core understands.
  UnsupportedImage,
  /// The framed payload doesn't fit in the carrier's usable bit capacity.
  CapacityExceeded,
  /// The in-image header failed its CRC-16 check.
  HeaderCorrupt,
  /// The recovered payload's hash didn't match. Carries the recovered bytes.
  IntegrityFailure(Vec<u8>),
  /// A Reed-Solomon block had more byte errors than `nsym / 2` could fix.
  /// Carries the best-effort decoded bytes.
  Uncorrectable(Vec<u8>),
}

impl fmt::Display for StegError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidPattern(msg) => write!(f, "invalid pattern: {msg}"),
      Self::UnsupportedImage => write!(f, "unsupported carrier image mode"),
      Self::CapacityExceeded => write!(f, "payload does not fit in carrier capacity"),
      Self::HeaderCorrupt => write!(f, "in-image header failed CRC-16 check"),
      Self::IntegrityFailure(bytes) => {
        write!(f, "hash mismatch after recovery ({} recovered bytes)", bytes.len())
      }
      Self::Uncorrectable(bytes) => {
        write!(f, "Reed-Solomon block uncorrectable ({} recovered bytes)", bytes.len())
      }
    }
  }
}

impl std::error::Error for StegError {}

impl StegError {
  /// Numeric process exit code for this error, per the core/CLI contract:
  /// `0 ok, 2 invalid pattern, 3 capacity, 4 header corrupt, 5 integrity
  /// failure, 6 unsupported image, 1 other`.
  ///
  /// The core never exits a process; this just hands the mapping to whatever
  /// CLI wrapper is built on top of it.
  #[must_use]
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::InvalidPattern(_) => 2,
      Self::CapacityExceeded => 3,
      Self::HeaderCorrupt => 4,
      Self::IntegrityFailure(_) => 5,
      Self::UnsupportedImage => 6,
      Self::Uncorrectable(_) => 1,
    }
  }

  /// The best-effort recovered bytes attached to this error, if any.
  #[must_use]
  pub fn partial(&self) -> Option<&[u8]> {
    match self {
      Self::IntegrityFailure(bytes) | Self::Uncorrectable(bytes) => Some(bytes),
      _ => None,
    }
  }
}

pub type StegResult<T> = Result<T, StegError>;
