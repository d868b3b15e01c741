// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![warn(missing_docs)]

//! Glyph Flow Rust (gfrs)
//!
//! Frame-to-frame hand motion tracking for camera-observed writing:
//! each incoming color frame is perspective-rectified to a top-down view
//! of the writing surface, reduced to a grayscale pyramid, and the
//! sparse optical flow of corner points between consecutive frames is
//! aggregated into one motion vector per frame.
//!
//! Start from [`session::Config`] to run the whole pipeline, or use the
//! [`core`] modules directly for the individual stages.

pub mod core;
pub mod misc;
pub mod session;
