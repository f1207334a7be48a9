//! Pure geometry of the paged array index structures.
//!
//! Nothing here performs I/O. The extensible array growth table, page counts
//! and page bitmap sizing must agree bit-for-bit with the reference encoder,
//! because every block size and field offset downstream is derived from them.

use core::fmt;

/// One growth level ("super block" in the reference library) of an
/// extensible array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecondaryBlockInfo {
    /// Number of data blocks on this level.
    pub data_block_count: u64,
    /// Elements held by each data block on this level.
    pub elements_per_data_block: u64,
    /// First element index (after the index block's inline elements)
    /// covered by this level.
    pub element_start: u64,
    /// Number of data blocks on all lower levels.
    pub data_block_start: u64,
}

impl SecondaryBlockInfo {
    /// Total elements addressable through this level.
    #[inline]
    pub fn element_capacity(&self) -> u64 {
        self.data_block_count
            .saturating_mul(self.elements_per_data_block)
    }

    /// One past the last element index covered by this level.
    #[inline]
    pub fn element_end(&self) -> u64 {
        self.element_start.saturating_add(self.element_capacity())
    }
}

/// `log2` of a value known to be a power of two.
#[inline]
pub fn log2_of_pow2(n: u64) -> u32 {
    n.trailing_zeros()
}

/// `floor(log2(n))` for `n > 0`.
#[inline]
pub fn log2_floor(n: u64) -> u32 {
    63 - n.leading_zeros()
}

/// Number of growth levels: `1 + max_elements_bits - log2(data_block_min_elements)`.
///
/// Returns 0 when the parameters cannot describe any level.
pub fn secondary_block_level_count(max_elements_bits: u8, data_block_min_elements: u8) -> usize {
    if data_block_min_elements == 0 {
        return 0;
    }
    let min_bits = log2_of_pow2(u64::from(data_block_min_elements));
    (u32::from(max_elements_bits) + 1).saturating_sub(min_bits) as usize
}

/// Build the growth table.
///
/// Level `u` has `2^(u/2)` data blocks of `2^((u+1)/2) * data_block_min_elements`
/// elements each, so data block counts and capacities double on alternating
/// levels: `1x1, 1x2, 2x2, 2x4, 4x4, ...` in units of the minimum block.
pub fn secondary_block_infos(
    max_elements_bits: u8,
    data_block_min_elements: u8,
) -> Vec<SecondaryBlockInfo> {
    let levels = secondary_block_level_count(max_elements_bits, data_block_min_elements);
    let min = u64::from(data_block_min_elements);
    let mut infos = Vec::with_capacity(levels);
    let mut element_start = 0u64;
    let mut data_block_start = 0u64;
    for u in 0..levels as u32 {
        let info = SecondaryBlockInfo {
            data_block_count: pow2(u / 2),
            elements_per_data_block: pow2((u + 1) / 2).saturating_mul(min),
            element_start,
            data_block_start,
        };
        element_start = element_start.saturating_add(info.element_capacity());
        data_block_start = data_block_start.saturating_add(info.data_block_count);
        infos.push(info);
    }
    infos
}

#[inline]
fn pow2(exp: u32) -> u64 {
    1u64.checked_shl(exp).unwrap_or(u64::MAX)
}

/// Width in bytes of the "block offset" field: `ceil(max_elements_bits / 8)`.
#[inline]
pub fn array_offset_size(max_elements_bits: u8) -> usize {
    (max_elements_bits as usize).div_ceil(8)
}

/// Number of growth levels whose data blocks are addressed directly from
/// the index block: `2 * log2(secondary_block_min_data_blocks)`.
#[inline]
pub fn index_block_level_count(secondary_block_min_data_blocks: u8) -> usize {
    if secondary_block_min_data_blocks == 0 {
        return 0;
    }
    2 * log2_of_pow2(u64::from(secondary_block_min_data_blocks)) as usize
}

/// Number of data block addresses stored in the index block:
/// `2 * (secondary_block_min_data_blocks - 1)`.
#[inline]
pub fn index_block_data_block_count(secondary_block_min_data_blocks: u8) -> usize {
    2 * (secondary_block_min_data_blocks as usize).saturating_sub(1)
}

/// Closed-form growth level of element `index` (counted after the index
/// block's inline elements).
#[inline]
pub fn level_of_element(index: u64, data_block_min_elements: u64) -> usize {
    log2_floor(index / data_block_min_elements + 1) as usize
}

/// Growth level covering element `index` by accumulating level capacities.
///
/// Returns `None` when `index` lies past the last level.
pub fn find_level(infos: &[SecondaryBlockInfo], index: u64) -> Option<usize> {
    let mut covered = 0u64;
    for (level, info) in infos.iter().enumerate() {
        covered = covered.saturating_add(info.element_capacity());
        if index < covered {
            return Some(level);
        }
    }
    None
}

/// A paged block that would hold fewer than two pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooFewPages {
    /// Elements in the block.
    pub elements: u64,
    /// Elements per page.
    pub page_elements: u64,
    /// Pages the block would hold.
    pub pages: u64,
}

impl fmt::Display for TooFewPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data block of {} elements with {}-element pages has {} page(s); paged blocks need at least 2",
            self.elements, self.page_elements, self.pages
        )
    }
}

/// Pages per extensible array data block of `elements` entries.
///
/// Returns 0 when the block is stored unpaged (`elements <= page_elements`).
pub fn data_block_page_count(elements: u64, page_elements: u64) -> Result<u64, TooFewPages> {
    if page_elements == 0 || elements <= page_elements {
        return Ok(0);
    }
    let pages = elements / page_elements;
    if pages < 2 {
        return Err(TooFewPages {
            elements,
            page_elements,
            pages,
        });
    }
    Ok(pages)
}

/// Bytes of page-initialisation bitmap per data block: `ceil(pages / 8)`.
#[inline]
pub fn page_bitmap_size(page_count: u64) -> u64 {
    (page_count + 7) / 8
}

/// Total bitmap bytes carried by a secondary block.
#[inline]
pub fn secondary_block_bitmap_size(page_count: u64, data_block_count: u64) -> u64 {
    page_bitmap_size(page_count).saturating_mul(data_block_count)
}

/// Bit `bit` of a little-endian bitmap (bit 0 is the LSB of byte 0).
///
/// Bits past the end of the bitmap read as unset.
#[inline]
pub fn bit_is_set(bitmap: &[u8], bit: u64) -> bool {
    usize::try_from(bit / 8)
        .ok()
        .and_then(|byte| bitmap.get(byte))
        .is_some_and(|b| b & (1 << (bit % 8)) != 0)
}

/// Pages of a fixed array data block: `ceil(elements / page_elements)` when
/// paged, 0 when `elements <= page_elements`.
#[inline]
pub fn fixed_array_page_count(elements: u64, page_elements: u64) -> u64 {
    if page_elements == 0 || elements <= page_elements {
        0
    } else {
        elements.div_ceil(page_elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_defaults_growth_table() {
        // max_nelmts_bits=32, data_blk_min_elmts=16
        let infos = secondary_block_infos(32, 16);
        assert_eq!(infos.len(), 29);
        let shape: Vec<(u64, u64)> = infos
            .iter()
            .take(6)
            .map(|i| (i.data_block_count, i.elements_per_data_block))
            .collect();
        assert_eq!(shape, vec![(1, 16), (1, 32), (2, 32), (2, 64), (4, 64), (4, 128)]);
        let starts: Vec<u64> = infos.iter().take(6).map(|i| i.element_start).collect();
        assert_eq!(starts, vec![0, 16, 48, 112, 240, 496]);
        let dblk_starts: Vec<u64> = infos.iter().take(6).map(|i| i.data_block_start).collect();
        assert_eq!(dblk_starts, vec![0, 1, 2, 4, 6, 10]);
    }

    #[test]
    fn small_parameter_table() {
        let infos = secondary_block_infos(8, 4);
        assert_eq!(infos.len(), 7);
        assert_eq!(infos[0].element_capacity(), 4);
        assert_eq!(infos[1].element_capacity(), 8);
        assert_eq!(infos[2].element_capacity(), 16);
        assert_eq!(infos[3].elements_per_data_block, 16);
        // 4 + 8 + 16 + 32 + 64 + 128 + 256
        assert_eq!(infos.last().unwrap().element_end(), 508);
    }

    #[test]
    fn cumulative_capacity_never_decreases() {
        for bits in 1..=40u8 {
            for min_bits in 0..=bits.min(7) {
                let infos = secondary_block_infos(bits, 1u8 << min_bits);
                let mut prev = 0;
                for info in &infos {
                    assert_eq!(info.element_start, prev);
                    assert!(info.element_end() >= prev);
                    prev = info.element_end();
                }
            }
        }
    }

    #[test]
    fn closed_form_matches_accumulation() {
        let infos = secondary_block_infos(16, 8);
        for idx in 0..5000u64 {
            assert_eq!(find_level(&infos, idx), Some(level_of_element(idx, 8)), "idx {idx}");
        }
    }

    #[test]
    fn find_level_past_capacity() {
        let infos = secondary_block_infos(4, 4);
        let end = infos.last().unwrap().element_end();
        assert_eq!(find_level(&infos, end - 1), Some(infos.len() - 1));
        assert_eq!(find_level(&infos, end), None);
    }

    #[test]
    fn index_block_address_table_sizes() {
        assert_eq!(index_block_level_count(4), 4);
        assert_eq!(index_block_data_block_count(4), 6);
        assert_eq!(index_block_level_count(1), 0);
        assert_eq!(index_block_data_block_count(1), 0);
        // The index block covers exactly the data blocks of its levels.
        let infos = secondary_block_infos(32, 16);
        let direct: u64 = infos[..index_block_level_count(8)]
            .iter()
            .map(|i| i.data_block_count)
            .sum();
        assert_eq!(direct as usize, index_block_data_block_count(8));
    }

    #[test]
    fn array_offset_width() {
        assert_eq!(array_offset_size(32), 4);
        assert_eq!(array_offset_size(10), 2);
        assert_eq!(array_offset_size(8), 1);
    }

    #[test]
    fn paging_boundary() {
        assert_eq!(data_block_page_count(8, 8), Ok(0));
        assert_eq!(data_block_page_count(7, 8), Ok(0));
        assert_eq!(
            data_block_page_count(9, 8),
            Err(TooFewPages { elements: 9, page_elements: 8, pages: 1 })
        );
        assert_eq!(data_block_page_count(16, 8), Ok(2));
        assert_eq!(data_block_page_count(4096, 1024), Ok(4));
    }

    #[test]
    fn bitmap_rounds_bits_up_to_bytes() {
        // (9 + 7) / 8, not 9 + 7 / 8.
        assert_eq!(page_bitmap_size(9), 2);
        assert_ne!(page_bitmap_size(9), 9 + 7 / 8);
        assert_eq!(page_bitmap_size(2), 1);
        assert_eq!(page_bitmap_size(8), 1);
        assert_eq!(page_bitmap_size(16), 2);
        assert_eq!(secondary_block_bitmap_size(4, 8), 8);
    }

    #[test]
    fn bitmap_bits_are_lsb_first() {
        let bitmap = [0b0000_0101u8, 0b1000_0000];
        assert!(bit_is_set(&bitmap, 0));
        assert!(!bit_is_set(&bitmap, 1));
        assert!(bit_is_set(&bitmap, 2));
        assert!(bit_is_set(&bitmap, 15));
        assert!(!bit_is_set(&bitmap, 16));
        assert!(!bit_is_set(&[], 0));
    }

    #[test]
    fn fixed_array_pages_round_up() {
        assert_eq!(fixed_array_page_count(1024, 1024), 0);
        assert_eq!(fixed_array_page_count(1025, 1024), 2);
        assert_eq!(fixed_array_page_count(3000, 1024), 3);
    }
}
