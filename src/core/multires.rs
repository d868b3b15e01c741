// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-resolution grayscale pyramids with preallocated levels.
//!
//! Each level is half the resolution of the previous one (odd last
//! line/column dropped), computed as the mean of each 2x2 block. The
//! session keeps exactly two pyramids alive and swaps their roles every
//! frame, so levels are allocated once and rebuilt in place afterwards.

use nalgebra::DMatrix;

/// An image pyramid owning its levels, base (full resolution) first.
pub struct Pyramid {
    levels: Vec<DMatrix<u8>>,
}

impl Pyramid {
    /// Allocate a pyramid of at most `nb_levels` levels for a base of
    /// shape `(nrows, ncols)`. Levels stop early if one dimension
    /// reaches zero, so the actual count can be lower for tiny frames.
    pub fn allocate(nb_levels: usize, nrows: usize, ncols: usize) -> Self {
        let mut levels = Vec::with_capacity(nb_levels);
        let (mut r, mut c) = (nrows, ncols);
        for _ in 0..nb_levels {
            if r == 0 || c == 0 {
                break;
            }
            levels.push(DMatrix::zeros(r, c));
            r /= 2;
            c /= 2;
        }
        Self { levels }
    }

    /// Number of levels actually allocated.
    pub fn nb_levels(&self) -> usize {
        self.levels.len()
    }

    /// Read access to one level.
    pub fn level(&self, lvl: usize) -> &DMatrix<u8> {
        &self.levels[lvl]
    }

    /// Mutable access to the base level, written by the rectifier.
    pub fn base_mut(&mut self) -> &mut DMatrix<u8> {
        &mut self.levels[0]
    }

    /// Recompute levels 1.. from the base level, in place.
    /// The base level is expected to have been filled by the caller.
    pub fn rebuild(&mut self) {
        for lvl in 1..self.levels.len() {
            let (finer, coarser) = self.levels.split_at_mut(lvl);
            halve_mean_into(&finer[lvl - 1], &mut coarser[0]);
        }
    }
}

/// Halve the resolution of a matrix into an already allocated destination,
/// averaging each 2x2 block. If one dimension of the source is odd, its
/// last line/column is dropped.
fn halve_mean_into(src: &DMatrix<u8>, dst: &mut DMatrix<u8>) {
    let (half_r, half_c) = dst.shape();
    debug_assert_eq!((half_r, half_c), (src.nrows() / 2, src.ncols() / 2));
    for j in 0..half_c {
        for i in 0..half_r {
            let a = u16::from(src[(2 * i, 2 * j)]);
            let b = u16::from(src[(2 * i + 1, 2 * j)]);
            let c = u16::from(src[(2 * i, 2 * j + 1)]);
            let d = u16::from(src[(2 * i + 1, 2 * j + 1)]);
            dst[(i, j)] = ((a + b + c + d) / 4) as u8;
        }
    }
}

// TESTS #############################################################
