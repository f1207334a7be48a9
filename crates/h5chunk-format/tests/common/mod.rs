//! Synthetic file builders for chunk index integration tests.
//!
//! The builders lay structures out the way the reference library does and
//! seal every checksummed block with a real lookup3 trailer. Geometry is
//! recomputed here by hand rather than through the crate under test.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use h5chunk_format::checksum::jenkins_lookup3;
use h5chunk_format::ChunkLocation;

/// Bytes reserved before the first structure so no block sits at address 0.
pub const BASE: u64 = 0x100;

pub fn write_uint(buf: &mut Vec<u8>, value: u64, width: usize) {
    buf.extend_from_slice(&value.to_le_bytes()[..width]);
}

pub fn undefined(width: usize) -> u64 {
    if width == 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    }
}

/// Append the lookup3 checksum of `buf[start..]`.
pub fn seal_from(buf: &mut Vec<u8>, start: usize) {
    let sum = jenkins_lookup3(&buf[start..]);
    buf.extend_from_slice(&sum.to_le_bytes());
}

pub fn seal(mut buf: Vec<u8>) -> Vec<u8> {
    seal_from(&mut buf, 0);
    buf
}

/// Creation parameters and file widths for a synthetic extensible array.
#[derive(Debug, Clone, Copy)]
pub struct EaParams {
    pub offset_size: u8,
    pub length_size: u8,
    /// Width of the chunk size field for filtered arrays, `None` for
    /// unfiltered ones.
    pub chunk_size_width: Option<u8>,
    pub max_elements_bits: u8,
    pub index_block_elements: u8,
    pub secondary_block_min_data_blocks: u8,
    pub data_block_min_elements: u8,
    pub max_page_elements_bits: u8,
}

impl EaParams {
    /// Library defaults: 32 bits, 4 inline, 4 data blocks, 16 elements, 1024-element pages.
    pub fn defaults() -> Self {
        Self {
            offset_size: 8,
            length_size: 8,
            chunk_size_width: None,
            max_elements_bits: 32,
            index_block_elements: 4,
            secondary_block_min_data_blocks: 4,
            data_block_min_elements: 16,
            max_page_elements_bits: 10,
        }
    }

    /// Small geometry where every level goes through a secondary block:
    /// 4-element minimum data blocks and 8-element pages.
    pub fn small() -> Self {
        Self {
            max_elements_bits: 10,
            index_block_elements: 4,
            secondary_block_min_data_blocks: 1,
            data_block_min_elements: 4,
            max_page_elements_bits: 3,
            ..Self::defaults()
        }
    }

    pub fn client_id(&self) -> u8 {
        u8::from(self.chunk_size_width.is_some())
    }

    pub fn element_size(&self) -> usize {
        self.offset_size as usize + self.chunk_size_width.map_or(0, |w| w as usize + 4)
    }

    fn array_offset_size(&self) -> usize {
        (self.max_elements_bits as usize + 7) / 8
    }

    fn page_elements(&self) -> u64 {
        1 << self.max_page_elements_bits
    }

    fn direct_levels(&self) -> usize {
        2 * self.secondary_block_min_data_blocks.trailing_zeros() as usize
    }

    fn direct_data_blocks(&self) -> usize {
        2 * (self.secondary_block_min_data_blocks as usize - 1)
    }

    pub fn levels(&self) -> Vec<Level> {
        let count = 1 + self.max_elements_bits as u32 - self.data_block_min_elements.trailing_zeros();
        let mut start = 0;
        let mut start_dblk = 0;
        (0..count)
            .map(|u| {
                let level = Level {
                    data_blocks: 1 << (u / 2),
                    elements: (1 << ((u + 1) / 2)) * self.data_block_min_elements as u64,
                    start,
                    start_dblk,
                };
                start += level.data_blocks * level.elements;
                start_dblk += level.data_blocks;
                level
            })
            .collect()
    }

    fn pages(&self, level: &Level) -> u64 {
        if level.elements > self.page_elements() {
            level.elements / self.page_elements()
        } else {
            0
        }
    }

    fn write_element(&self, buf: &mut Vec<u8>, loc: Option<&ChunkLocation>) {
        let os = self.offset_size as usize;
        match loc {
            Some(l) => write_uint(buf, l.address, os),
            None => write_uint(buf, undefined(os), os),
        }
        if let Some(w) = self.chunk_size_width {
            write_uint(buf, loc.and_then(|l| l.size).unwrap_or(0), w as usize);
            write_uint(buf, loc.map_or(0, |l| l.filter_mask as u64), 4);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub data_blocks: u64,
    pub elements: u64,
    pub start: u64,
    pub start_dblk: u64,
}

/// A serialized extensible array plus the placement of every block.
#[derive(Debug, Clone)]
pub struct EaFixture {
    pub bytes: Vec<u8>,
    pub header: u64,
    pub index_block: u64,
    /// level -> (address, encoded length)
    pub secondary_blocks: BTreeMap<usize, (u64, usize)>,
    /// (level, data block index) -> (address, encoded length)
    pub data_blocks: BTreeMap<(usize, u64), (u64, usize)>,
}

impl EaFixture {
    pub fn secondary_block_range(&self, level: usize) -> std::ops::Range<usize> {
        let (addr, len) = self.secondary_blocks[&level];
        addr as usize..addr as usize + len
    }
}

/// Serialize an extensible array holding `chunks` (linear index, location).
pub fn build_extensible_array(p: &EaParams, chunks: &[(u64, ChunkLocation)]) -> EaFixture {
    let os = p.offset_size as usize;
    let ls = p.length_size as usize;
    let esize = p.element_size();
    let arr_off = p.array_offset_size();
    let levels = p.levels();
    let direct = p.direct_levels();
    let inline_count = p.index_block_elements as u64;
    let page_elements = p.page_elements();

    let mut inline: Vec<Option<ChunkLocation>> = vec![None; inline_count as usize];
    let mut blocks: BTreeMap<(usize, u64), Vec<Option<ChunkLocation>>> = BTreeMap::new();
    for &(idx, loc) in chunks {
        if idx < inline_count {
            inline[idx as usize] = Some(loc);
            continue;
        }
        let rel = idx - inline_count;
        let u = levels
            .iter()
            .position(|l| rel < l.start + l.data_blocks * l.elements)
            .expect("index beyond array capacity");
        let within = rel - levels[u].start;
        let d = within / levels[u].elements;
        let e = (within % levels[u].elements) as usize;
        blocks
            .entry((u, d))
            .or_insert_with(|| vec![None; levels[u].elements as usize])[e] = Some(loc);
    }

    let used_levels: BTreeSet<usize> = blocks.keys().map(|&(u, _)| u).collect();
    let header_size = 12 + 6 * ls + os + 4;
    let iblock_size =
        6 + os + inline_count as usize * esize + (p.direct_data_blocks() + levels.len() - direct) * os + 4;
    let sblock_size = |u: usize| {
        let l = &levels[u];
        let pages = p.pages(l);
        let bitmap = if pages > 0 { l.data_blocks as usize * ((pages as usize + 7) / 8) } else { 0 };
        6 + os + arr_off + bitmap + l.data_blocks as usize * os + 4
    };
    let page_size = page_elements as usize * esize + 4;
    let dblock_size = |u: usize| {
        let l = &levels[u];
        let pages = p.pages(l) as usize;
        if pages > 0 {
            6 + os + arr_off + 4 + pages * page_size
        } else {
            6 + os + arr_off + l.elements as usize * esize + 4
        }
    };

    // Placement.
    let header = BASE;
    let index_block = header + header_size as u64;
    let mut next = index_block + iblock_size as u64;
    let mut secondary_blocks = BTreeMap::new();
    let mut data_blocks = BTreeMap::new();
    for &u in &used_levels {
        if u >= direct {
            secondary_blocks.insert(u, (next, sblock_size(u)));
            next += sblock_size(u) as u64;
        }
        for (&(_, d), _) in blocks.range((u, 0)..=(u, u64::MAX)) {
            data_blocks.insert((u, d), (next, dblock_size(u)));
            next += dblock_size(u) as u64;
        }
    }

    let max_index_set = chunks.iter().map(|&(i, _)| i + 1).max().unwrap_or(0);
    let mut bytes = vec![0u8; BASE as usize];

    // Header.
    let mut b = b"EAHD".to_vec();
    b.extend_from_slice(&[
        0,
        p.client_id(),
        esize as u8,
        p.max_elements_bits,
        p.index_block_elements,
        p.data_block_min_elements,
        p.secondary_block_min_data_blocks,
        p.max_page_elements_bits,
    ]);
    let sblk_bytes: usize = secondary_blocks.values().map(|&(_, len)| len).sum();
    let dblk_bytes: usize = data_blocks.values().map(|&(_, len)| len).sum();
    for stat in [
        secondary_blocks.len() as u64,
        sblk_bytes as u64,
        data_blocks.len() as u64,
        dblk_bytes as u64,
        max_index_set,
        max_index_set,
    ] {
        write_uint(&mut b, stat, ls);
    }
    write_uint(&mut b, index_block, os);
    bytes.extend_from_slice(&seal(b));
    assert_eq!(bytes.len() as u64, index_block);

    // Index block.
    let mut b = b"EAIB".to_vec();
    b.extend_from_slice(&[0, p.client_id()]);
    write_uint(&mut b, header, os);
    for loc in &inline {
        p.write_element(&mut b, loc.as_ref());
    }
    for slot in 0..p.direct_data_blocks() as u64 {
        let addr = (0..direct)
            .flat_map(|u| (0..levels[u].data_blocks).map(move |d| (u, d)))
            .find(|&(u, d)| levels[u].start_dblk + d == slot)
            .and_then(|key| data_blocks.get(&key))
            .map_or(undefined(os), |&(a, _)| a);
        write_uint(&mut b, addr, os);
    }
    for u in direct..levels.len() {
        let addr = secondary_blocks.get(&u).map_or(undefined(os), |&(a, _)| a);
        write_uint(&mut b, addr, os);
    }
    bytes.extend_from_slice(&seal(b));

    for &u in &used_levels {
        let l = levels[u];
        let pages = p.pages(&l);
        let page_written = |d: u64, page: u64| {
            blocks.get(&(u, d)).is_some_and(|elems| {
                elems[(page * page_elements) as usize..((page + 1) * page_elements) as usize]
                    .iter()
                    .any(Option::is_some)
            })
        };

        if u >= direct {
            assert_eq!(bytes.len() as u64, secondary_blocks[&u].0);
            let mut b = b"EASB".to_vec();
            b.extend_from_slice(&[0, p.client_id()]);
            write_uint(&mut b, header, os);
            write_uint(&mut b, l.start, arr_off);
            if pages > 0 {
                let mut bitmap = vec![0u8; l.data_blocks as usize * ((pages as usize + 7) / 8)];
                for d in 0..l.data_blocks {
                    for page in 0..pages {
                        if page_written(d, page) {
                            let bit = (d * pages + page) as usize;
                            bitmap[bit / 8] |= 1 << (bit % 8);
                        }
                    }
                }
                b.extend_from_slice(&bitmap);
            }
            for d in 0..l.data_blocks {
                let addr = data_blocks.get(&(u, d)).map_or(undefined(os), |&(a, _)| a);
                write_uint(&mut b, addr, os);
            }
            bytes.extend_from_slice(&seal(b));
        }

        for (&(_, d), elems) in blocks.range((u, 0)..=(u, u64::MAX)) {
            assert_eq!(bytes.len() as u64, data_blocks[&(u, d)].0);
            let mut b = b"EADB".to_vec();
            b.extend_from_slice(&[0, p.client_id()]);
            write_uint(&mut b, header, os);
            write_uint(&mut b, l.start + d * l.elements, arr_off);
            if pages == 0 {
                for loc in elems {
                    p.write_element(&mut b, loc.as_ref());
                }
                bytes.extend_from_slice(&seal(b));
                continue;
            }
            bytes.extend_from_slice(&seal(b));
            for page in 0..pages {
                // Pages of direct data blocks are always written.
                if u < direct || page_written(d, page) {
                    let mut pg = Vec::with_capacity(page_size);
                    let range = (page * page_elements) as usize..((page + 1) * page_elements) as usize;
                    for loc in &elems[range] {
                        p.write_element(&mut pg, loc.as_ref());
                    }
                    bytes.extend_from_slice(&seal(pg));
                } else {
                    bytes.extend(std::iter::repeat(0u8).take(page_size));
                }
            }
        }
    }
    assert_eq!(bytes.len() as u64, next);

    EaFixture {
        bytes,
        header,
        index_block,
        secondary_blocks,
        data_blocks,
    }
}

/// Serialize a fixed array of `element_count` unfiltered 8-byte addresses
/// with `2^page_bits` elements per page. Returns the file and header address.
pub fn build_fixed_array(page_bits: u8, element_count: u64, chunks: &[(u64, u64)]) -> (Vec<u8>, u64) {
    let page_elements = 1u64 << page_bits;
    let paged = element_count > page_elements;
    let pages = if paged { element_count.div_ceil(page_elements) } else { 0 };
    let mut elems = vec![u64::MAX; element_count as usize];
    for &(i, addr) in chunks {
        elems[i as usize] = addr;
    }

    let header = BASE;
    let header_size = 4 + 4 + 8 + 8 + 4;
    let dblock = header + header_size;

    let mut bytes = vec![0u8; BASE as usize];
    let mut b = b"FAHD".to_vec();
    b.extend_from_slice(&[0, 0, 8, page_bits]);
    write_uint(&mut b, element_count, 8);
    write_uint(&mut b, dblock, 8);
    bytes.extend_from_slice(&seal(b));

    let mut b = b"FADB".to_vec();
    b.extend_from_slice(&[0, 0]);
    write_uint(&mut b, header, 8);
    if !paged {
        for &e in &elems {
            write_uint(&mut b, e, 8);
        }
        bytes.extend_from_slice(&seal(b));
        return (bytes, header);
    }

    let mut bitmap = vec![0u8; ((pages + 7) / 8) as usize];
    let page_range = |page: u64| {
        let start = (page * page_elements) as usize;
        start..(start + page_elements as usize).min(element_count as usize)
    };
    for page in 0..pages {
        if elems[page_range(page)].iter().any(|&e| e != u64::MAX) {
            bitmap[(page / 8) as usize] |= 1 << (page % 8);
        }
    }
    b.extend_from_slice(&bitmap);
    bytes.extend_from_slice(&seal(b));
    for page in 0..pages {
        let range = page_range(page);
        let written = bitmap[(page / 8) as usize] & (1 << (page % 8)) != 0;
        if written {
            let mut pg = Vec::new();
            for &e in &elems[range] {
                write_uint(&mut pg, e, 8);
            }
            bytes.extend_from_slice(&seal(pg));
        } else {
            bytes.extend(std::iter::repeat(0u8).take(range.len() * 8 + 4));
        }
    }
    (bytes, header)
}

/// One entry of a synthetic v1 B-tree node: key offsets (without the
/// trailing element-size zero), chunk size, filter mask and child address.
#[derive(Debug, Clone)]
pub struct BTreeEntry {
    pub offsets: Vec<u64>,
    pub chunk_size: u32,
    pub filter_mask: u32,
    pub child: u64,
}

/// Serialize a v1 B-tree chunk node with 8-byte addresses. `last_key` is
/// the upper bound key that closes the node.
pub fn btree_node(level: u8, entries: &[BTreeEntry], last_key: &[u64]) -> Vec<u8> {
    let mut b = b"TREE".to_vec();
    b.push(1);
    b.push(level);
    b.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    write_uint(&mut b, u64::MAX, 8);
    write_uint(&mut b, u64::MAX, 8);
    let key = |b: &mut Vec<u8>, size: u32, mask: u32, offsets: &[u64]| {
        b.extend_from_slice(&size.to_le_bytes());
        b.extend_from_slice(&mask.to_le_bytes());
        for &o in offsets {
            write_uint(b, o, 8);
        }
        write_uint(b, 0, 8);
    };
    for e in entries {
        key(&mut b, e.chunk_size, e.filter_mask, &e.offsets);
        write_uint(&mut b, e.child, 8);
    }
    key(&mut b, 0, 0, last_key);
    b
}

/// Place `blob` at `address`, growing the file as needed.
pub fn place(file: &mut Vec<u8>, address: u64, blob: &[u8]) {
    let start = address as usize;
    if file.len() < start + blob.len() {
        file.resize(start + blob.len(), 0);
    }
    file[start..start + blob.len()].copy_from_slice(blob);
}
