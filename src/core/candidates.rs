// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Candidate corner selection on the previous frame's base level.
//!
//! The response is a fixed-window Laplacian criterion: a pixel qualifies
//! when the magnitude of its Laplacian exceeds a first threshold, it is a
//! local extremum of the Laplacian in its 3x3 neighborhood, and the
//! minimum eigenvalue of the local Hessian exceeds a second threshold.
//! Qualifying pixels are scored by that minimum eigenvalue and returned
//! sorted by descending score with a stable sort, so scan order (row by
//! row, left to right) wins ties.

use nalgebra::DMatrix;

use crate::misc::type_aliases::Float;

/// Offset used for the second derivative estimates.
const DERIV_RADIUS: usize = 5;
/// Offset used for the cross derivative estimate.
const CROSS_RADIUS: usize = 3;
/// Columns skipped after an accepted corner, to keep detections sparse.
const SKIP_AFTER_HIT: usize = 5;

/// A candidate corner: integer position plus corner-response score.
/// Ephemeral, recomputed from scratch every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Column of the pixel.
    pub x: usize,
    /// Row of the pixel.
    pub y: usize,
    /// Minimum eigenvalue of the local Hessian.
    pub score: Float,
}

/// Corner detector owning its response buffers, allocated once for fixed
/// frame dimensions and reused every cycle.
pub struct Detector {
    /// Candidate threshold on the Laplacian magnitude.
    pub laplacian_threshold: i32,
    /// Candidate threshold on the minimum eigenvalue score.
    pub min_eigen_value_threshold: Float,
    laplacian: DMatrix<i32>,
    found: Vec<Keypoint>,
}

impl Detector {
    /// Allocate a detector for frames of shape `(nrows, ncols)`.
    pub fn new(
        laplacian_threshold: i32,
        min_eigen_value_threshold: Float,
        nrows: usize,
        ncols: usize,
    ) -> Self {
        Self {
            laplacian_threshold,
            min_eigen_value_threshold,
            laplacian: DMatrix::zeros(nrows, ncols),
            found: Vec::new(),
        }
    }

    /// Detect corners in `img`, which must have the shape the detector was
    /// allocated for. Returns the qualifying keypoints sorted by
    /// descending score (stable, scan order wins ties).
    pub fn detect(&mut self, img: &DMatrix<u8>) -> &[Keypoint] {
        let (nrows, ncols) = img.shape();
        assert_eq!(self.laplacian.shape(), (nrows, ncols), "detector shape mismatch");
        self.found.clear();
        let border = DERIV_RADIUS + 1;
        if nrows <= 2 * border || ncols <= 2 * border {
            return &self.found;
        }

        let d = DERIV_RADIUS;
        for y in d..(nrows - d) {
            for x in d..(ncols - d) {
                let center = 4 * i32::from(img[(y, x)]);
                self.laplacian[(y, x)] = i32::from(img[(y, x - d)])
                    + i32::from(img[(y, x + d)])
                    + i32::from(img[(y - d, x)])
                    + i32::from(img[(y + d, x)])
                    - center;
            }
        }

        for y in border..(nrows - border) {
            let mut x = border;
            while x < ncols - border {
                let lap = self.laplacian[(y, x)];
                if lap.abs() > self.laplacian_threshold && self.is_local_extremum(x, y, lap) {
                    let score = min_eigen_value(img, x, y);
                    if score > self.min_eigen_value_threshold {
                        self.found.push(Keypoint { x, y, score });
                        x += SKIP_AFTER_HIT;
                        continue;
                    }
                }
                x += 1;
            }
        }

        // Stable sort: ties keep their scan order, first encountered wins.
        self.found
            .sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
        &self.found
    }

    /// Extremum test on the 3x3 Laplacian neighborhood, non-strict so that
    /// flat-topped responses still qualify (the scan skip keeps them sparse).
    fn is_local_extremum(&self, x: usize, y: usize, lap: i32) -> bool {
        let mut extremum = true;
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let n = self.laplacian[((y as i32 + dy) as usize, (x as i32 + dx) as usize)];
                extremum &= if lap > 0 { lap >= n } else { lap <= n };
            }
        }
        extremum
    }
}

/// Minimum eigenvalue (in absolute value) of the local Hessian
/// `[ixx ixy; ixy iyy]`, estimated with the fixed detector offsets.
fn min_eigen_value(img: &DMatrix<u8>, x: usize, y: usize) -> Float {
    let at = |dy: i32, dx: i32| i32::from(img[((y as i32 + dy) as usize, (x as i32 + dx) as usize)]);
    let d = DERIV_RADIUS as i32;
    let c = CROSS_RADIUS as i32;
    let ixx = at(0, d) + at(0, -d) - 2 * at(0, 0);
    let iyy = at(d, 0) + at(-d, 0) - 2 * at(0, 0);
    let ixy = at(c, c) + at(-c, -c) - at(-c, c) - at(c, -c);
    let tr = (ixx + iyy) as Float;
    let delta = (((ixx - iyy) * (ixx - iyy) + 4 * ixy * ixy) as Float).sqrt();
    ((tr - delta).abs()).min((tr + delta).abs()) / 2.0
}

// TESTS #############################################################
