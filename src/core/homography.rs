// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fixed perspective rectification of incoming frames.
//!
//! The camera looks at the writing surface at an angle, so the session
//! computes once, at startup, the 3x3 projective transform mapping the
//! raw frame quad onto a canonical top-down quad. Every frame is then
//! warped through that same transform, there is no per-frame estimation.

use nalgebra::{DMatrix, SMatrix, SVector};

use crate::core::sampling;
use crate::misc::type_aliases::{Float, Mat3, Point2, Vec3};

/// A projective transform and its precomputed inverse.
///
/// The inverse is required because warping samples the source image at
/// the preimage of each destination pixel.
#[derive(Debug, Clone)]
pub struct Transform {
    forward: Mat3,
    inverse: Mat3,
}

impl Transform {
    /// Solve the projective transform mapping each `source` point onto the
    /// corresponding `target` point (4 correspondences, h33 normalized to 1).
    ///
    /// Returns `None` for degenerate configurations (e.g. three collinear
    /// points) where the linear system is singular or the resulting matrix
    /// is not invertible. This is a startup configuration error for the
    /// session, never a per-frame condition.
    pub fn from_correspondences(source: &[Point2; 4], target: &[Point2; 4]) -> Option<Self> {
        let mut system = SMatrix::<Float, 8, 8>::zeros();
        let mut rhs = SVector::<Float, 8>::zeros();
        for (k, (s, d)) in source.iter().zip(target.iter()).enumerate() {
            let r = 2 * k;
            let row_u = [s.x, s.y, 1.0, 0.0, 0.0, 0.0, -d.x * s.x, -d.x * s.y];
            let row_v = [0.0, 0.0, 0.0, s.x, s.y, 1.0, -d.y * s.x, -d.y * s.y];
            for c in 0..8 {
                system[(r, c)] = row_u[c];
                system[(r + 1, c)] = row_v[c];
            }
            rhs[r] = d.x;
            rhs[r + 1] = d.y;
        }
        let h = system.lu().solve(&rhs)?;
        #[rustfmt::skip]
        let forward = Mat3::new(
            h[0], h[1], h[2],
            h[3], h[4], h[5],
            h[6], h[7], 1.0,
        );
        let inverse = forward.try_inverse()?;
        // A near-singular system can still "solve" in floating point, so
        // verify that the transform actually maps the correspondences.
        let scale = source
            .iter()
            .chain(target.iter())
            .fold(1.0 as Float, |m, p| m.max(p.x.abs()).max(p.y.abs()));
        for (s, d) in source.iter().zip(target.iter()) {
            let m = project(&forward, *s);
            if !m.x.is_finite()
                || !m.y.is_finite()
                || (m.x - d.x).abs() > 1e-3 * scale
                || (m.y - d.y).abs() > 1e-3 * scale
            {
                return None;
            }
        }
        Some(Self { forward, inverse })
    }

    /// Map a point from the source (raw frame) plane to the target
    /// (rectified) plane.
    pub fn apply(&self, p: Point2) -> Point2 {
        project(&self.forward, p)
    }

    /// Map a point from the target (rectified) plane back to the source
    /// (raw frame) plane.
    pub fn apply_inverse(&self, p: Point2) -> Point2 {
        project(&self.inverse, p)
    }
}

/// Apply a 3x3 projective matrix to a 2D point (homogeneous divide).
fn project(mat: &Mat3, p: Point2) -> Point2 {
    let q = mat * Vec3::new(p.x, p.y, 1.0);
    Point2::new(q.x / q.z, q.y / q.z)
}

/// Warp the source frame into the destination frame.
///
/// Every destination pixel `(x, y)`, offset by `origin` in the rectified
/// plane, is inverse-mapped through the transform and the source is
/// sampled with bilinear interpolation, zero-filled outside its bounds.
/// Bilinear sampling is part of the output contract: switching to nearest
/// neighbor would change every downstream response numerically.
pub fn rectify_into(transform: &Transform, origin: Point2, src: &DMatrix<u8>, dst: &mut DMatrix<u8>) {
    let (nrows, ncols) = dst.shape();
    for y in 0..nrows {
        for x in 0..ncols {
            let p = transform
                .apply_inverse(Point2::new(x as Float + origin.x, y as Float + origin.y));
            dst[(y, x)] = sampling::bilinear_zero(src, p.x, p.y).round() as u8;
        }
    }
}

/// Calibration geometry of the rectification: which quad of the raw frame
/// is mapped where, and which rectangle of the rectified plane is kept as
/// the session's working frame.
#[derive(Debug, Clone)]
pub struct Rectification {
    /// Corners of the raw frame quad, in frame coordinates.
    pub source_quad: [Point2; 4],
    /// Where those corners land in the rectified plane.
    pub target_quad: [Point2; 4],
    /// Top-left corner of the output crop in the rectified plane.
    pub origin: Point2,
    /// Width of the rectified working frame.
    pub out_width: usize,
    /// Height of the rectified working frame.
    pub out_height: usize,
}

impl Rectification {
    /// Geometry compensating a camera mounted above and behind the writing
    /// surface: the frame top edge is squeezed by `top_warp` and the kept
    /// region is the top `bottom_warp` fraction of the frame height.
    ///
    /// With the reference constants (640x480, 0.5, 0.5) this maps the
    /// frame onto a trapeze with top corners at x = 160 and x = 480 and
    /// keeps a 320x240 crop starting at x = 160.
    pub fn overhead(width: usize, height: usize, top_warp: Float, bottom_warp: Float) -> Self {
        let w = width as Float;
        let h = height as Float;
        let top_left = w * top_warp / 2.0;
        let top_right = 3.0 * w * top_warp / 2.0;
        let bottom_height = h * bottom_warp;
        Self {
            source_quad: [
                Point2::new(0.0, 0.0),
                Point2::new(w, 0.0),
                Point2::new(w, h),
                Point2::new(0.0, h),
            ],
            target_quad: [
                Point2::new(top_left, 0.0),
                Point2::new(top_right, 0.0),
                Point2::new(w, bottom_height),
                Point2::new(0.0, bottom_height),
            ],
            origin: Point2::new(top_left, 0.0),
            out_width: (top_right - top_left) as usize,
            out_height: bottom_height as usize,
        }
    }

    /// Identity geometry: no perspective correction, full frame kept.
    /// Mostly useful for tests and flat-mounted cameras.
    pub fn full_frame(width: usize, height: usize) -> Self {
        let w = width as Float;
        let h = height as Float;
        let quad = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ];
        Self {
            source_quad: quad,
            target_quad: quad,
            origin: Point2::new(0.0, 0.0),
            out_width: width,
            out_height: height,
        }
    }

    /// Solve the projective transform of this geometry.
    pub fn transform(&self) -> Option<Transform> {
        Transform::from_correspondences(&self.source_quad, &self.target_quad)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON_CORNERS: Float = 1e-2;

    #[test]
    fn overhead_maps_calibration_corners() {
        let geom = Rectification::overhead(640, 480, 0.5, 0.5);
        let transform = geom.transform().unwrap();
        for (s, d) in geom.source_quad.iter().zip(geom.target_quad.iter()) {
            let mapped = transform.apply(*s);
            assert_relative_eq!(mapped.x, d.x, epsilon = EPSILON_CORNERS);
            assert_relative_eq!(mapped.y, d.y, epsilon = EPSILON_CORNERS);
        }
    }

    #[test]
    fn corners_round_trip_through_inverse() {
        let geom = Rectification::overhead(640, 480, 0.5, 0.5);
        let transform = geom.transform().unwrap();
        for s in geom.source_quad.iter() {
            let back = transform.apply_inverse(transform.apply(*s));
            assert_relative_eq!(back.x, s.x, epsilon = EPSILON_CORNERS);
            assert_relative_eq!(back.y, s.y, epsilon = EPSILON_CORNERS);
        }
    }

    #[test]
    fn full_frame_is_identity() {
        let geom = Rectification::full_frame(320, 240);
        let transform = geom.transform().unwrap();
        let p = Point2::new(12.5, 42.0);
        let mapped = transform.apply(p);
        assert_relative_eq!(mapped.x, p.x, epsilon = 1e-3);
        assert_relative_eq!(mapped.y, p.y, epsilon = 1e-3);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        // Three collinear source points: no unique transform.
        let source = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        let target = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(Transform::from_correspondences(&source, &target).is_none());
    }

    #[test]
    fn identity_warp_preserves_interior() {
        let geom = Rectification::full_frame(16, 12);
        let transform = geom.transform().unwrap();
        // Frame captured as a GrayImage, converted the way tuning sessions
        // load frames back in.
        let img = image::GrayImage::from_fn(16, 12, |x, y| image::Luma([(7 * y + 3 * x) as u8]));
        let src = crate::misc::interop::matrix_from_image(img);
        let mut dst = DMatrix::zeros(12, 16);
        rectify_into(&transform, geom.origin, &src, &mut dst);
        // Borders are zero-filled by the sampling policy; compare the interior.
        for y in 1..10 {
            for x in 1..14 {
                assert_eq!(dst[(y, x)], src[(y, x)], "mismatch at ({}, {})", x, y);
            }
        }
    }
}
