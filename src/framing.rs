//! Integrity & framing: the compression → hash → Reed-Solomon → repetition
//! pipeline that turns a raw payload into the byte stream the slot iterator
//! writes, and its exact inverse.

use md5::{Digest as _, Md5};
use sha2::Sha256;
use tracing::debug;

use crate::error::{StegError, StegResult};
use crate::pattern::{Compression, HashCheck, Normalized, RepetitionMode};
use crate::redundancy::{decode_reed_solomon, encode_reed_solomon, repeat_decode, repeat_encode, rs_block_sizes};

/// A framed, RS- and repetition-coded byte stream ready for bit placement,
/// together with the body length a header needs to record to drive decode.
pub struct Framed {
  pub bytes: Vec<u8>,
  /// Length of `compressed_body || hash`, before Reed-Solomon and
  /// repetition. This is what the header's "payload length" field carries.
  pub body_len: usize,
}

fn hash_len(hash_check: HashCheck) -> usize {
  match hash_check {
    HashCheck::None => 0,
    HashCheck::Md5 => 16,
    HashCheck::Sha256 => 32,
  }
}

fn compute_hash(hash_check: HashCheck, body: &[u8]) -> Vec<u8> {
  match hash_check {
    HashCheck::None => Vec::new(),
    HashCheck::Md5 => Md5::digest(body).to_vec(),
    HashCheck::Sha256 => Sha256::digest(body).to_vec(),
  }
}

fn compress(strength: u8, payload: &[u8]) -> Vec<u8> {
  miniz_oxide::deflate::compress_to_vec_zlib(payload, strength)
}

fn decompress(body: &[u8]) -> StegResult<Vec<u8>> {
  miniz_oxide::inflate::decompress_to_vec_zlib(body).map_err(|_| StegError::HeaderCorrupt)
}

fn rs_stream_len(body_len: usize, normalized: &Normalized) -> usize {
  match normalized.source.advanced_redundancy {
    crate::pattern::AdvancedRedundancy::None => body_len,
    crate::pattern::AdvancedRedundancy::ReedSolomon => {
      let (k, _, n) = rs_block_sizes(normalized.source.advanced_redundancy_correction_factor);
      body_len.div_ceil(k.max(1)) * n
    }
  }
}

/// Total length, in bytes, of the fully framed (RS- and repetition-coded)
/// stream that `frame_encode` would produce for a body of `body_len` bytes.
/// Repetition only ever duplicates whole units, so the total scales exactly
/// by `repetitive_redundancy` regardless of unit size.
#[must_use]
pub fn framed_len_bytes(body_len: usize, normalized: &Normalized) -> usize {
  rs_stream_len(body_len, normalized) * normalized.source.repetitive_redundancy as usize
}

/// Repetition unit length for the post-RS byte stream: one whole codeword
/// in `block` mode (or the entire stream, if Reed-Solomon is disabled), one
/// byte in `byte_per_byte` mode.
fn repetition_unit_len(normalized: &Normalized, rs_stream_len: usize) -> usize {
  match normalized.source.repetitive_redundancy_mode {
    RepetitionMode::BytePerByte => 1,
    RepetitionMode::Block => {
      if normalized.source.advanced_redundancy == crate::pattern::AdvancedRedundancy::ReedSolomon {
        let (_, _, n) = rs_block_sizes(normalized.source.advanced_redundancy_correction_factor);
        n
      } else {
        rs_stream_len.max(1)
      }
    }
  }
}

/// Encode order (inner to outer): optional compression of the raw payload,
/// optional hash appended over the post-compression body, Reed-Solomon,
/// repetition.
pub fn frame_encode(payload: &[u8], normalized: &Normalized) -> Framed {
  let source = &normalized.source;

  let compressed = match source.compression {
    Compression::None => payload.to_vec(),
    Compression::Zlib => compress(source.compression_strength, payload),
  };

  let digest = compute_hash(source.hash_check, &compressed);
  let mut body = compressed;
  body.extend_from_slice(&digest);
  let body_len = body.len();

  let rs_stream = match source.advanced_redundancy {
    crate::pattern::AdvancedRedundancy::None => body,
    crate::pattern::AdvancedRedundancy::ReedSolomon => {
      encode_reed_solomon(&body, source.advanced_redundancy_correction_factor)
    }
  };

  let unit_len = repetition_unit_len(normalized, rs_stream.len());
  let bytes = repeat_encode(&rs_stream, source.repetitive_redundancy, unit_len);
  debug!(body_len, framed_len = bytes.len(), "framed payload");
  Framed { bytes, body_len }
}

/// Inverts [`frame_encode`]: repetition majority vote, Reed-Solomon
/// correction, hash verification, decompression.
pub fn frame_decode(encoded: &[u8], body_len: usize, normalized: &Normalized) -> StegResult<Vec<u8>> {
  let source = &normalized.source;

  let rs_stream_len = rs_stream_len(body_len, normalized);
  let unit_len = repetition_unit_len(normalized, rs_stream_len);
  let rs_stream = repeat_decode(encoded, source.repetitive_redundancy, unit_len);

  let body = match source.advanced_redundancy {
    crate::pattern::AdvancedRedundancy::None => {
      let take = body_len.min(rs_stream.len());
      rs_stream[..take].to_vec()
    }
    crate::pattern::AdvancedRedundancy::ReedSolomon => {
      decode_reed_solomon(&rs_stream, body_len, source.advanced_redundancy_correction_factor)?
    }
  };

  let digest_len = hash_len(source.hash_check);
  if body.len() < digest_len {
    return Err(StegError::IntegrityFailure(body));
  }
  let split = body.len() - digest_len;
  let (compressed, digest) = body.split_at(split);

  if source.hash_check != HashCheck::None {
    let expected = compute_hash(source.hash_check, compressed);
    if expected != digest {
      return Err(StegError::IntegrityFailure(compressed.to_vec()));
    }
  }

  match source.compression {
    Compression::None => Ok(compressed.to_vec()),
    Compression::Zlib => decompress(compressed).map_err(|_| StegError::IntegrityFailure(compressed.to_vec())),
  }
}
