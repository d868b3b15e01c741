// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between raw frames, the image crate types
//! and the matrix types used by the tracking pipeline.
//!
//! Only `gray_into` sits on the per-frame path. The `GrayImage`
//! conversions exist for offline inspection: dumping a rectified frame or
//! a pyramid level to disk while tuning thresholds, and loading captured
//! frames back into matrices in tests.

use image::{GrayImage, Luma};
use nalgebra::DMatrix;

/// Convert an interleaved RGBA (4 bytes per pixel) frame buffer into an
/// already allocated grayscale matrix.
///
/// Uses fixed point Rec.601 luma weights `(4899 r + 9617 g + 1868 b) >> 14`,
/// with rounding, so that results are reproducible across platforms.
///
/// Panics if `data` is shorter than `4 * nrows * ncols` of the destination
/// or if the destination shape does not match `(height, width)`.
pub fn gray_into(data: &[u8], width: usize, height: usize, gray: &mut DMatrix<u8>) {
    assert_eq!(gray.shape(), (height, width), "gray buffer shape mismatch");
    assert!(data.len() >= 4 * width * height, "frame buffer too short");
    for y in 0..height {
        let row = 4 * y * width;
        for x in 0..width {
            let p = row + 4 * x;
            let r = u32::from(data[p]);
            let g = u32::from(data[p + 1]);
            let b = u32::from(data[p + 2]);
            gray[(y, x)] = ((4899 * r + 9617 * g + 1868 * b + 8192) >> 14) as u8;
        }
    }
}

/// Convert an `u8` matrix into a `GrayImage`.
/// Inverse operation of `matrix_from_image`.
///
/// Performs a transposition to accomodate for the
/// column major matrix into the row major image.
pub fn image_from_matrix(mat: &DMatrix<u8>) -> GrayImage {
    let (nb_rows, nb_cols) = mat.shape();
    let mut img_buf = GrayImage::new(nb_cols as u32, nb_rows as u32);
    for (x, y, pixel) in img_buf.enumerate_pixels_mut() {
        *pixel = Luma([mat[(y as usize, x as usize)]]);
    }
    img_buf
}

/// Convert a `GrayImage` into an `u8` matrix.
/// Inverse operation of `image_from_matrix`.
pub fn matrix_from_image(img: GrayImage) -> DMatrix<u8> {
    let (width, height) = img.dimensions();
    DMatrix::from_row_slice(height as usize, width as usize, &img.into_raw())
}

// TESTS #############################################################
