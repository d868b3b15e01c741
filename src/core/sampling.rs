// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bilinear sampling of matrices at sub-pixel positions.
//!
//! Two border policies are provided and must not be mixed up:
//! zero-fill for the perspective warp (pixels outside the source are
//! black) and clamping for the flow tracker patches (the iteration must
//! keep producing finite values near the borders).

use nalgebra::{DMatrix, Scalar};
use num_traits::AsPrimitive;

use crate::misc::type_aliases::Float;

/// Bilinear interpolation at `(x, y)`, zero outside the matrix.
///
/// Coordinates follow image conventions: `x` is the column, `y` the row.
pub fn bilinear_zero<T>(mat: &DMatrix<T>, x: Float, y: Float) -> Float
where
    T: Scalar + Copy + AsPrimitive<Float>,
{
    let (nrows, ncols) = mat.shape();
    let x0 = x.floor();
    let y0 = y.floor();
    if x0 < 0.0 || y0 < 0.0 || x0 + 1.0 > (ncols - 1) as Float || y0 + 1.0 > (nrows - 1) as Float {
        return 0.0;
    }
    let (i, j) = (y0 as usize, x0 as usize);
    let a = x - x0;
    let b = y - y0;
    let vul: Float = mat[(i, j)].as_();
    let vur: Float = mat[(i, j + 1)].as_();
    let vdl: Float = mat[(i + 1, j)].as_();
    let vdr: Float = mat[(i + 1, j + 1)].as_();
    (1.0 - b) * ((1.0 - a) * vul + a * vur) + b * ((1.0 - a) * vdl + a * vdr)
}

/// Bilinear interpolation at `(x, y)`, clamping coordinates to the matrix.
///
/// Also clamps the neighbor indices, so matrices with a single row or
/// column (the coarsest levels of a deep pyramid) degrade to linear or
/// constant interpolation instead of reading out of bounds.
pub fn bilinear_clamped<T>(mat: &DMatrix<T>, x: Float, y: Float) -> Float
where
    T: Scalar + Copy + AsPrimitive<Float>,
{
    let (nrows, ncols) = mat.shape();
    let max_x = (ncols - 1) as Float;
    let max_y = (nrows - 1) as Float;
    let x = x.max(0.0).min(max_x);
    let y = y.max(0.0).min(max_y);
    let x0 = x.floor();
    let y0 = y.floor();
    let (i, j) = (y0 as usize, x0 as usize);
    let i1 = (i + 1).min(nrows - 1);
    let j1 = (j + 1).min(ncols - 1);
    let a = x - x0;
    let b = y - y0;
    let vul: Float = mat[(i, j)].as_();
    let vur: Float = mat[(i, j1)].as_();
    let vdl: Float = mat[(i1, j)].as_();
    let vdr: Float = mat[(i1, j1)].as_();
    (1.0 - b) * ((1.0 - a) * vul + a * vur) + b * ((1.0 - a) * vdl + a * vdr)
}

// TESTS #############################################################
