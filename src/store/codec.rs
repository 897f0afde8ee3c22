//! Compact binary encoding for raw sample windows.
//!
//! Samples are stored as little-endian signed 16-bit values, clamped to the
//! i16 range on encode. Decode is the exact inverse for clamped input.

/// Encode a window of integer readings to the storage representation.
pub fn encode_samples(samples: &[i64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for &v in samples {
        let clamped = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        buf.extend_from_slice(&clamped.to_le_bytes());
    }
    buf
}

/// Decode the storage representation back into integer readings.
pub fn decode_samples(buf: &[u8]) -> Vec<i64> {
    buf.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as i64)
        .collect()
}
