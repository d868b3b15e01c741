// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reduction of the per-point displacements to one motion vector.

use itertools::izip;

use crate::misc::type_aliases::{Point2, Vec2};

/// Componentwise mean of `curr - prev` over the successfully tracked
/// points among the first `point_count` entries.
///
/// Lost points (status 0) are excluded. When nothing was tracked the
/// result is exactly `(0, 0)`, never a division by zero.
pub fn mean_displacement(
    prev_xy: &[Point2],
    curr_xy: &[Point2],
    status: &[u8],
    point_count: usize,
) -> Vec2 {
    let mut sum = Vec2::zeros();
    let mut tracked = 0;
    for (p, q, s) in izip!(
        prev_xy.iter().take(point_count),
        curr_xy.iter().take(point_count),
        status.iter().take(point_count),
    ) {
        if *s == 1 {
            sum += q - p;
            tracked += 1;
        }
    }
    if tracked == 0 {
        Vec2::zeros()
    } else {
        sum / tracked as f32
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::misc::type_aliases::Float;

    #[test]
    fn empty_set_yields_exact_zero() {
        let v = mean_displacement(&[], &[], &[], 0);
        assert_eq!(v, Vec2::zeros());
    }

    #[test]
    fn lost_points_are_excluded() {
        let prev = vec![Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)];
        let curr = vec![Point2::new(2.0, 0.0), Point2::new(99.0, 99.0)];
        let status = vec![1u8, 0u8];
        let v = mean_displacement(&prev, &curr, &status, 2);
        assert_eq!(v, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn reads_bounded_by_point_count() {
        // The second slot is stale garbage and must not contribute.
        let prev = vec![Point2::new(0.0, 0.0), Point2::new(-1000.0, 0.0)];
        let curr = vec![Point2::new(1.0, 1.0), Point2::new(1000.0, 0.0)];
        let status = vec![1u8, 1u8];
        let v = mean_displacement(&prev, &curr, &status, 1);
        assert_eq!(v, Vec2::new(1.0, 1.0));
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn all_lost_yields_zero(displacements: Vec<(Float, Float)>) -> bool {
        let prev: Vec<Point2> = displacements.iter().map(|_| Point2::origin()).collect();
        let curr: Vec<Point2> = displacements
            .iter()
            .map(|&(x, y)| Point2::new(x, y))
            .collect();
        let status = vec![0u8; prev.len()];
        mean_displacement(&prev, &curr, &status, prev.len()) == Vec2::zeros()
    }

    #[quickcheck_macros::quickcheck]
    fn uniform_displacement_is_preserved(dx: Float, dy: Float, n: u8) -> bool {
        if !dx.is_finite() || !dy.is_finite() {
            return true;
        }
        // Displacements are bounded by the rectified frame dimensions, so
        // fold the generated values into that range; unbounded values would
        // overflow the f32 accumulator, which the production path never can.
        let dx = dx % 512.0;
        let dy = dy % 512.0;
        let n = usize::from(n % 32) + 1;
        let prev: Vec<Point2> = (0..n).map(|i| Point2::new(i as Float, 2.0 * i as Float)).collect();
        let curr: Vec<Point2> = prev.iter().map(|p| p + Vec2::new(dx, dy)).collect();
        let status = vec![1u8; n];
        let v = mean_displacement(&prev, &curr, &status, n);
        (v.x - dx).abs() <= dx.abs() * 1e-5 + 1e-3 && (v.y - dy).abs() <= dy.abs() * 1e-5 + 1e-3
    }
}
