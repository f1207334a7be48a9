//! Mapping between chunk coordinates and linear chunk indices.
//!
//! Array-based indexes number chunks over the dataset's *maximum* extent,
//! so a dataset can grow without renumbering the chunks it already has.
//! The extensible array additionally moves its unlimited dimension to the
//! front before folding, so that growth only ever appends.

use crate::error::{FormatError, Result};

/// Maximum dimension size of an unlimited dataspace dimension.
pub const UNLIMITED: u64 = u64::MAX;

/// How chunk coordinates are folded into a linear index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinearOrder {
    /// Row-major over the maximum chunk counts, dimension 0 slowest.
    #[default]
    RowMajor,
    /// Row-major after moving the unlimited dimension to the front.
    UnlimitedFirst,
}

/// The grid of chunks covering a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    chunk_dims: Vec<u64>,
    grid_dims: Vec<u64>,
    max_grid_dims: Vec<u64>,
    order: LinearOrder,
    /// Multiplier for each dimension's chunk coordinate.
    strides: Vec<u64>,
    /// Dimensions from slowest to fastest varying.
    axes: Vec<usize>,
}

impl ChunkGrid {
    /// Build the grid for a fixed-size dataset of `dataset_dims` elements
    /// split into chunks of `chunk_dims` elements. Partial edge chunks count
    /// as chunks.
    pub fn new(dataset_dims: &[u64], chunk_dims: &[u64]) -> Result<Self> {
        Self::with_max_dims(dataset_dims, dataset_dims, chunk_dims, LinearOrder::RowMajor)
    }

    /// Build the grid for a dataset currently `dataset_dims` elements in
    /// size that may grow to `max_dims` ([`UNLIMITED`] for an unbounded
    /// dimension).
    pub fn with_max_dims(
        dataset_dims: &[u64],
        max_dims: &[u64],
        chunk_dims: &[u64],
        order: LinearOrder,
    ) -> Result<Self> {
        let rank = chunk_dims.len();
        if dataset_dims.len() != rank || max_dims.len() != rank {
            return Err(FormatError::InvalidLayout(format!(
                "dataset rank {} and maximum rank {} do not match chunk rank {rank}",
                dataset_dims.len(),
                max_dims.len(),
            )));
        }
        if let Some(d) = chunk_dims.iter().position(|&c| c == 0) {
            return Err(FormatError::InvalidLayout(format!("chunk dimension {d} is zero")));
        }
        if let Some(d) = (0..rank).find(|&d| max_dims[d] != UNLIMITED && max_dims[d] < dataset_dims[d]) {
            return Err(FormatError::InvalidLayout(format!(
                "dimension {d} is {} elements but its maximum is {}",
                dataset_dims[d], max_dims[d]
            )));
        }

        let grid_dims: Vec<u64> = dataset_dims
            .iter()
            .zip(chunk_dims)
            .map(|(&n, &c)| n.div_ceil(c))
            .collect();
        let max_grid_dims: Vec<u64> = max_dims
            .iter()
            .zip(chunk_dims)
            .map(|(&n, &c)| if n == UNLIMITED { UNLIMITED } else { n.div_ceil(c) })
            .collect();

        let mut axes: Vec<usize> = (0..rank).collect();
        if order == LinearOrder::UnlimitedFirst {
            if let Some(u) = max_dims.iter().position(|&m| m == UNLIMITED) {
                axes.remove(u);
                axes.insert(0, u);
            }
        }

        let mut strides = vec![0u64; rank];
        let mut stride = 1u64;
        for (pos, &axis) in axes.iter().enumerate().rev() {
            strides[axis] = stride;
            if pos == 0 {
                break;
            }
            let extent = max_grid_dims[axis];
            if extent == UNLIMITED {
                return Err(FormatError::InvalidLayout(format!(
                    "unlimited dimension {axis} is not the slowest-varying dimension"
                )));
            }
            stride = stride
                .checked_mul(extent)
                .ok_or_else(|| FormatError::InvalidLayout("chunk grid overflows 64 bits".into()))?;
        }

        Ok(Self {
            chunk_dims: chunk_dims.to_vec(),
            grid_dims,
            max_grid_dims,
            order,
            strides,
            axes,
        })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.grid_dims.len()
    }

    #[inline]
    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk_dims
    }

    /// Number of chunks along each dimension at the current extent.
    #[inline]
    pub fn grid_dims(&self) -> &[u64] {
        &self.grid_dims
    }

    /// Number of chunks along each dimension at the maximum extent;
    /// [`UNLIMITED`] for an unbounded dimension.
    #[inline]
    pub fn max_grid_dims(&self) -> &[u64] {
        &self.max_grid_dims
    }

    #[inline]
    pub fn order(&self) -> LinearOrder {
        self.order
    }

    /// Chunks covering the current extent.
    pub fn chunk_count(&self) -> u64 {
        self.grid_dims.iter().fold(1u64, |acc, &d| acc.saturating_mul(d))
    }

    /// Chunks covering the maximum extent, saturating for unlimited grids.
    pub fn max_chunk_count(&self) -> u64 {
        self.max_grid_dims.iter().fold(1u64, |acc, &d| acc.saturating_mul(d))
    }

    /// Whether `coords` (in chunk units) lies inside the current extent.
    pub fn contains(&self, coords: &[u64]) -> bool {
        coords.len() == self.rank() && coords.iter().zip(&self.grid_dims).all(|(&c, &d)| c < d)
    }

    /// Linear index of the chunk at `coords` (in chunk units), or `None`
    /// when the coordinate lies outside the current extent.
    pub fn linearize(&self, coords: &[u64]) -> Option<u64> {
        if !self.contains(coords) {
            return None;
        }
        coords
            .iter()
            .zip(&self.strides)
            .try_fold(0u64, |acc, (&c, &s)| acc.checked_add(c.checked_mul(s)?))
    }

    /// Chunk coordinates of linear index `linear`, or `None` when it names
    /// no chunk inside the current extent.
    pub fn delinearize(&self, linear: u64) -> Option<Vec<u64>> {
        if self.chunk_count() == 0 {
            return None;
        }
        let mut rest = linear;
        let mut coords = vec![0u64; self.rank()];
        for &axis in &self.axes {
            let stride = self.strides[axis];
            coords[axis] = rest / stride;
            rest %= stride;
        }
        self.contains(&coords).then_some(coords)
    }

    /// Coordinates of the chunk containing dataset element `element`.
    pub fn chunk_of_element(&self, element: &[u64]) -> Option<Vec<u64>> {
        if element.len() != self.rank() {
            return None;
        }
        Some(
            element
                .iter()
                .zip(&self.chunk_dims)
                .map(|(&e, &c)| e / c)
                .collect(),
        )
    }

    /// Element offset of the first element of chunk `coords`.
    pub fn element_offset(&self, coords: &[u64]) -> Vec<u64> {
        coords
            .iter()
            .zip(&self.chunk_dims)
            .map(|(&c, &d)| c.saturating_mul(d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_order() {
        // 10x7 dataset, 4x3 chunks -> 3x3 grid
        let grid = ChunkGrid::new(&[10, 7], &[4, 3]).unwrap();
        assert_eq!(grid.grid_dims(), &[3, 3]);
        assert_eq!(grid.chunk_count(), 9);
        assert_eq!(grid.linearize(&[0, 0]), Some(0));
        assert_eq!(grid.linearize(&[0, 2]), Some(2));
        assert_eq!(grid.linearize(&[1, 0]), Some(3));
        assert_eq!(grid.linearize(&[2, 2]), Some(8));
        assert_eq!(grid.linearize(&[3, 0]), None);
        assert_eq!(grid.delinearize(5), Some(vec![1, 2]));
        assert_eq!(grid.delinearize(9), None);
    }

    #[test]
    fn every_index_round_trips() {
        let grid = ChunkGrid::new(&[5, 6, 7], &[2, 3, 2]).unwrap();
        for i in 0..grid.chunk_count() {
            let coords = grid.delinearize(i).unwrap();
            assert_eq!(grid.linearize(&coords), Some(i));
        }
    }

    #[test]
    fn strides_follow_maximum_extent() {
        // 4x6 dataset that may grow to 8x10, 2x2 chunks: 2x3 now, 4x5 at most.
        let grid = ChunkGrid::with_max_dims(&[4, 6], &[8, 10], &[2, 2], LinearOrder::RowMajor).unwrap();
        assert_eq!(grid.grid_dims(), &[2, 3]);
        assert_eq!(grid.max_grid_dims(), &[4, 5]);
        assert_eq!(grid.max_chunk_count(), 20);
        assert_eq!(grid.linearize(&[1, 2]), Some(7));
        assert_eq!(grid.linearize(&[1, 3]), None);
        assert_eq!(grid.delinearize(7), Some(vec![1, 2]));
        // Index 3 is chunk (0, 3), past the current extent.
        assert_eq!(grid.delinearize(3), None);
    }

    #[test]
    fn unlimited_dimension_moves_to_the_front() {
        // 4x10 dataset, 2x2 chunks, dimension 1 unlimited.
        let grid =
            ChunkGrid::with_max_dims(&[4, 10], &[4, UNLIMITED], &[2, 2], LinearOrder::UnlimitedFirst).unwrap();
        assert_eq!(grid.max_grid_dims(), &[2, UNLIMITED]);
        assert_eq!(grid.max_chunk_count(), u64::MAX);
        assert_eq!(grid.linearize(&[1, 0]), Some(1));
        assert_eq!(grid.linearize(&[0, 1]), Some(2));
        assert_eq!(grid.linearize(&[1, 4]), Some(9));
        assert_eq!(grid.delinearize(9), Some(vec![1, 4]));
        for i in 0..grid.chunk_count() {
            let coords = grid.delinearize(i).unwrap();
            assert_eq!(grid.linearize(&coords), Some(i));
        }

        // Leading unlimited dimension: plain row-major.
        let grid =
            ChunkGrid::with_max_dims(&[10, 4], &[UNLIMITED, 4], &[2, 2], LinearOrder::UnlimitedFirst).unwrap();
        assert_eq!(grid.linearize(&[1, 0]), Some(2));
    }

    #[test]
    fn unlimited_inner_dimension_needs_reordering() {
        let err = ChunkGrid::with_max_dims(&[4, 10], &[4, UNLIMITED], &[2, 2], LinearOrder::RowMajor);
        assert!(matches!(err, Err(FormatError::InvalidLayout(_))));
    }

    #[test]
    fn element_to_chunk() {
        let grid = ChunkGrid::new(&[100], &[16]).unwrap();
        assert_eq!(grid.chunk_of_element(&[47]), Some(vec![2]));
        assert_eq!(grid.element_offset(&[2]), vec![32]);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(ChunkGrid::new(&[10, 10], &[5]).is_err());
        assert!(ChunkGrid::new(&[10], &[0]).is_err());
        assert!(ChunkGrid::with_max_dims(&[10], &[8], &[4], LinearOrder::RowMajor).is_err());
        assert!(ChunkGrid::with_max_dims(&[10], &[10, 10], &[4], LinearOrder::RowMajor).is_err());
        let empty = ChunkGrid::new(&[0], &[4]).unwrap();
        assert_eq!(empty.chunk_count(), 0);
        assert_eq!(empty.delinearize(0), None);
    }
}
