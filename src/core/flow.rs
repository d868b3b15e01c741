// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pyramidal Lucas-Kanade optical flow for the seed point set.
//!
//! For each seed point the displacement is refined from the coarsest
//! pyramid level down to the base level. Per level the 2x2 normal
//! equations of the flow system are solved iteratively on a fixed square
//! window, with the template gradients taken from the previous frame so
//! the normal matrix is computed once per level.
//!
//! Per-point failure is not an error: a point whose window is too poorly
//! conditioned (minimum eigenvalue below threshold), whose refinement
//! does not converge at the base level, or whose estimate leaves the
//! frame, is flagged as lost and skipped by the aggregation stage.

use itertools::izip;

use crate::core::multires::Pyramid;
use crate::core::sampling;
use crate::misc::type_aliases::{Float, Point2, Vec2};

/// Pyramidal Lucas-Kanade tracker with preallocated patch buffers.
pub struct Tracker {
    /// Size of the search window at each pyramid level.
    pub win_size: usize,
    /// Maximum number of refinement iterations per pyramid level.
    pub max_iterations: usize,
    /// Stop iterating once the incremental shift moves by less than this.
    pub epsilon: Float,
    /// Minimum eigenvalue of the normal matrix, divided by the number of
    /// pixels in the window, below which a point is flagged as lost.
    pub min_eigen_threshold: Float,
    tpl: Vec<Float>,
    grad_x: Vec<Float>,
    grad_y: Vec<Float>,
}

/// Outcome of the per-level refinement.
enum Refine {
    /// New displacement estimate and whether the epsilon criterion was met.
    Done(Vec2, bool),
    /// Ill-conditioned window, the point cannot be tracked at this level.
    IllConditioned,
}

impl Tracker {
    /// Create a tracker. Reference tunables: window 15, 15 iterations,
    /// epsilon 0.01, minimum eigenvalue threshold 0.001.
    pub fn new(win_size: usize, max_iterations: usize, epsilon: Float, min_eigen_threshold: Float) -> Self {
        let half = win_size / 2;
        let area = (2 * half + 1) * (2 * half + 1);
        Self {
            win_size,
            max_iterations,
            epsilon,
            min_eigen_threshold,
            tpl: vec![0.0; area],
            grad_x: vec![0.0; area],
            grad_y: vec![0.0; area],
        }
    }

    /// Track the first `point_count` seed points from the previous pyramid
    /// into the current one. Writes the new positions into `curr_xy` and
    /// one status byte per point (1 = tracked, 0 = lost). Slots beyond
    /// `point_count` are left untouched.
    pub fn track(
        &mut self,
        prev_pyr: &Pyramid,
        curr_pyr: &Pyramid,
        prev_xy: &[Point2],
        curr_xy: &mut [Point2],
        status: &mut [u8],
        point_count: usize,
    ) {
        let nb_levels = prev_pyr.nb_levels().min(curr_pyr.nb_levels());
        let (base_rows, base_cols) = prev_pyr.level(0).shape();
        for (p, q, s) in izip!(
            prev_xy.iter().take(point_count),
            curr_xy.iter_mut().take(point_count),
            status.iter_mut().take(point_count),
        ) {
            let mut flow = Vec2::zeros();
            let mut tracked = true;
            for lvl in (0..nb_levels).rev() {
                let scale = (1u32 << lvl) as Float;
                match self.refine_at_level(
                    prev_pyr.level(lvl),
                    curr_pyr.level(lvl),
                    p.x / scale,
                    p.y / scale,
                    flow,
                ) {
                    Refine::IllConditioned => {
                        tracked = false;
                        break;
                    }
                    Refine::Done(new_flow, converged) => {
                        flow = new_flow;
                        if lvl == 0 {
                            // Hitting the iteration cap without meeting
                            // epsilon at full resolution counts as a loss.
                            tracked = converged;
                        } else {
                            flow *= 2.0;
                        }
                    }
                }
            }
            let new_pos = p + flow;
            let in_frame = new_pos.x >= 0.0
                && new_pos.x < base_cols as Float
                && new_pos.y >= 0.0
                && new_pos.y < base_rows as Float;
            *q = new_pos;
            *s = (tracked && in_frame && new_pos.x.is_finite() && new_pos.y.is_finite()) as u8;
        }
    }

    /// One level of iterative refinement around `(px, py)`, starting from
    /// the displacement estimate propagated from the coarser level.
    fn refine_at_level(
        &mut self,
        prev_img: &nalgebra::DMatrix<u8>,
        curr_img: &nalgebra::DMatrix<u8>,
        px: Float,
        py: Float,
        initial_flow: Vec2,
    ) -> Refine {
        let half = (self.win_size / 2) as i32;
        let side = (2 * half + 1) as usize;
        let area = side * side;

        // Template values and gradients from the previous frame.
        // The normal matrix only depends on them, so it is fixed per level.
        let mut gxx = 0.0;
        let mut gxy = 0.0;
        let mut gyy = 0.0;
        let mut idx = 0;
        for wy in -half..=half {
            for wx in -half..=half {
                let x = px + wx as Float;
                let y = py + wy as Float;
                let gx = 0.5
                    * (sampling::bilinear_clamped(prev_img, x + 1.0, y)
                        - sampling::bilinear_clamped(prev_img, x - 1.0, y));
                let gy = 0.5
                    * (sampling::bilinear_clamped(prev_img, x, y + 1.0)
                        - sampling::bilinear_clamped(prev_img, x, y - 1.0));
                self.tpl[idx] = sampling::bilinear_clamped(prev_img, x, y);
                self.grad_x[idx] = gx;
                self.grad_y[idx] = gy;
                gxx += gx * gx;
                gxy += gx * gy;
                gyy += gy * gy;
                idx += 1;
            }
        }

        let delta = ((gxx - gyy) * (gxx - gyy) + 4.0 * gxy * gxy).sqrt();
        let min_eigen = (gxx + gyy - delta) / (2.0 * area as Float);
        let det = gxx * gyy - gxy * gxy;
        if min_eigen < self.min_eigen_threshold || det.abs() <= Float::EPSILON {
            return Refine::IllConditioned;
        }
        let inv_det = 1.0 / det;

        let mut flow = initial_flow;
        for _ in 0..self.max_iterations {
            let mut bx = 0.0;
            let mut by = 0.0;
            let mut idx = 0;
            for wy in -half..=half {
                for wx in -half..=half {
                    let x = px + flow.x + wx as Float;
                    let y = py + flow.y + wy as Float;
                    let error = self.tpl[idx] - sampling::bilinear_clamped(curr_img, x, y);
                    bx += self.grad_x[idx] * error;
                    by += self.grad_y[idx] * error;
                    idx += 1;
                }
            }
            let step = Vec2::new(inv_det * (gyy * bx - gxy * by), inv_det * (gxx * by - gxy * bx));
            flow += step;
            if step.norm() < self.epsilon {
                return Refine::Done(flow, true);
            }
        }
        Refine::Done(flow, false)
    }
}

// TESTS #############################################################
