//! HDF5 metadata checksum: Jenkins lookup3 `hashlittle` with a zero seed.
//!
//! Every versioned chunk index block ends with a 4-byte little-endian
//! checksum computed over all bytes that precede it.

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::error::{FormatError, Result, Structure};

/// Size of the checksum trailer in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Compute the Jenkins lookup3 checksum of a byte slice.
///
/// Matches `H5_checksum_lookup3(data, len, 0)` in the reference library.
pub fn jenkins_lookup3(data: &[u8]) -> u32 {
    hashlittle(data, 0)
}

/// Verify the checksum trailer of a complete block image.
///
/// `image` must include the trailing 4 checksum bytes. Returns the stored
/// checksum on success.
pub fn verify_trailing(image: &[u8], structure: Structure, offset: u64) -> Result<u32> {
    if image.len() < CHECKSUM_SIZE {
        return Err(FormatError::UnexpectedEof {
            structure,
            offset,
            expected: CHECKSUM_SIZE,
            available: image.len(),
        });
    }
    let split = image.len() - CHECKSUM_SIZE;
    let stored = LittleEndian::read_u32(&image[split..]);
    let computed = jenkins_lookup3(&image[..split]);
    if stored != computed {
        warn!(%structure, offset, stored, computed, "checksum mismatch");
        return Err(FormatError::ChecksumMismatch {
            structure,
            offset,
            stored,
            computed,
        });
    }
    Ok(stored)
}

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(4);  *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(6);  *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(8);  *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(16); *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(19); *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(4);  *b = b.wrapping_add(*a);
}

#[inline]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(24));
}

/// Little-endian partial word: up to 4 bytes, missing high bytes are zero.
#[inline]
fn partial_word(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
}

fn hashlittle(data: &[u8], initval: u32) -> u32 {
    let mut a = 0xdeadbeefu32
        .wrapping_add(data.len() as u32)
        .wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    // All but the last block: affect some 32 bits of (a, b, c).
    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(LittleEndian::read_u32(&rest[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&rest[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    // Last block: 0..=12 bytes.
    if rest.is_empty() {
        return c;
    }
    let (wa, tail) = rest.split_at(rest.len().min(4));
    a = a.wrapping_add(partial_word(wa));
    if !tail.is_empty() {
        let (wb, tail) = tail.split_at(tail.len().min(4));
        b = b.wrapping_add(partial_word(wb));
        if !tail.is_empty() {
            c = c.wrapping_add(partial_word(tail));
        }
    }

    final_mix(&mut a, &mut b, &mut c);
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_seed_state() {
        assert_eq!(jenkins_lookup3(b""), 0xdeadbeef);
    }

    #[test]
    fn reference_driver_value() {
        // Value printed by the driver in Bob Jenkins' lookup3.c.
        assert_eq!(
            jenkins_lookup3(b"Four score and seven years ago"),
            0x17770551
        );
    }

    #[test]
    fn seeded_reference_value() {
        assert_eq!(hashlittle(b"Four score and seven years ago", 1), 0xcd628161);
    }

    #[test]
    fn all_tail_lengths_are_distinct() {
        let data: Vec<u8> = (0u8..40).collect();
        let mut seen = std::collections::HashSet::new();
        for len in 0..=data.len() {
            assert!(seen.insert(jenkins_lookup3(&data[..len])), "collision at {len}");
        }
    }

    #[test]
    fn verify_trailing_accepts_valid_image() {
        let mut image = b"EASB\x00\x00payload".to_vec();
        let sum = jenkins_lookup3(&image);
        image.extend_from_slice(&sum.to_le_bytes());
        assert_eq!(verify_trailing(&image, Structure::EaSecondaryBlock, 64).unwrap(), sum);
    }

    #[test]
    fn verify_trailing_rejects_flipped_bit() {
        let mut image = b"EASB\x00\x00payload".to_vec();
        let sum = jenkins_lookup3(&image);
        image.extend_from_slice(&sum.to_le_bytes());
        image[7] ^= 0x10;
        let err = verify_trailing(&image, Structure::EaSecondaryBlock, 64).unwrap_err();
        assert!(matches!(
            err,
            FormatError::ChecksumMismatch { offset: 64, stored, .. } if stored == sum
        ));
    }

    #[test]
    fn verify_trailing_short_image() {
        let err = verify_trailing(&[1, 2], Structure::EaHeader, 0).unwrap_err();
        assert!(matches!(err, FormatError::UnexpectedEof { expected: 4, available: 2, .. }));
    }
}
