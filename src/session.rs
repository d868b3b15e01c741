// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Orchestration of the per-frame tracking cycle.
//!
//! A session owns every buffer of the pipeline: the grayscale scratch
//! frame, both pyramids, the seed coordinate arrays and the status bytes.
//! All of it is allocated once, when the first frame reveals the stream
//! dimensions, and reused afterwards by swapping previous/current roles.
//!
//! The session is single-threaded and frame-synchronous: the surrounding
//! application calls `step` from its own per-frame trigger (e.g. a
//! display refresh callback) and exactly one cycle runs at a time. A step
//! with no frame available is a cheap no-op. Callers should cancel their
//! trigger before dropping the session so a late callback cannot observe
//! released buffers.

use std::mem;

use nalgebra::DMatrix;
use thiserror::Error;

use crate::core::aggregate;
use crate::core::candidates::Detector;
use crate::core::flow;
use crate::core::homography::{self, Rectification, Transform};
use crate::core::multires::Pyramid;
use crate::misc::interop;
use crate::misc::type_aliases::{Float, Point2, Vec2};

/// The single output of one tracking cycle: the mean displacement of the
/// successfully tracked points, in rectified-frame pixels.
pub type MotionVector = Vec2;

/// Supplier of raw color frames. Delivery may be slower or more irregular
/// than the session's trigger; dimensions are assumed constant for the
/// whole session after the first delivered frame.
pub trait FrameSource {
    /// The next available frame, or `None` when no new frame is ready.
    fn next_frame(&mut self) -> Option<RawFrame<'_>>;
}

/// A borrowed raw frame: interleaved RGBA bytes plus pixel dimensions.
pub struct RawFrame<'a> {
    /// Interleaved RGBA pixel data, row major, 4 bytes per pixel.
    pub data: &'a [u8],
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

/// Consumer of the per-cycle motion vector, typically a drawing surface
/// moving its cursor.
pub trait MotionSink {
    /// Called once per completed cycle, zero vectors included.
    fn on_motion_vector(&mut self, motion: MotionVector);
}

/// Fatal session failures. Per-point tracking loss and empty seed sets
/// are not errors: they are absorbed into status bytes and zero vectors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A tunable is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The rectification quad admits no invertible perspective transform.
    #[error("degenerate rectification quad, no perspective transform exists")]
    DegenerateQuad,
    /// A delivered frame has a zero dimension.
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions {
        /// Delivered frame width.
        width: usize,
        /// Delivered frame height.
        height: usize,
    },
    /// A delivered frame does not match the session's allocated buffers.
    #[error("frame dimensions changed from {expected_width}x{expected_height} to {width}x{height}")]
    DimensionChange {
        /// Width the session was allocated for.
        expected_width: usize,
        /// Height the session was allocated for.
        expected_height: usize,
        /// Delivered frame width.
        width: usize,
        /// Delivered frame height.
        height: usize,
    },
}

/// Configuration of a tracking session. All tunables are fixed at
/// construction time and immutable afterwards.
pub struct Config {
    /// Number of levels in the image pyramids.
    pub nb_levels: usize,
    /// Maximum number of seed points tracked per cycle.
    pub capacity: usize,
    /// Size of the flow search window at each pyramid level.
    pub win_size: usize,
    /// Iteration cap per pyramid level in the flow tracker.
    pub max_iterations: usize,
    /// Flow convergence threshold, in pixels.
    pub epsilon: Float,
    /// Conditioning threshold of the flow normal matrix.
    pub min_eigen_threshold: Float,
    /// Corner detector threshold on the Laplacian magnitude.
    pub laplacian_threshold: i32,
    /// Corner detector threshold on the minimum eigenvalue score.
    pub min_eigen_value_threshold: Float,
    /// Fixed perspective rectification geometry.
    pub rectification: Rectification,
}

impl Default for Config {
    /// Reference tunables of the original deployment.
    fn default() -> Self {
        Self {
            nb_levels: 3,
            capacity: 100,
            win_size: 15,
            max_iterations: 15,
            epsilon: 0.01,
            min_eigen_threshold: 0.001,
            laplacian_threshold: 30,
            min_eigen_value_threshold: 25.0,
            rectification: Rectification::overhead(640, 480, 0.5, 0.5),
        }
    }
}

impl Config {
    /// Validate the configuration, solve the rectification transform and
    /// enter the `Ready` state. Buffers are allocated lazily on the first
    /// delivered frame, when the stream dimensions become known.
    pub fn start<S: FrameSource>(self, source: S) -> Result<Session<S>, SessionError> {
        if self.nb_levels == 0 {
            return Err(SessionError::InvalidConfig("nb_levels must be at least 1"));
        }
        if self.capacity == 0 {
            return Err(SessionError::InvalidConfig("capacity must be at least 1"));
        }
        if self.win_size < 3 {
            return Err(SessionError::InvalidConfig("win_size must be at least 3"));
        }
        if self.max_iterations == 0 {
            return Err(SessionError::InvalidConfig("max_iterations must be at least 1"));
        }
        if !(self.epsilon > 0.0) {
            return Err(SessionError::InvalidConfig("epsilon must be positive"));
        }
        if self.rectification.out_width == 0 || self.rectification.out_height == 0 {
            return Err(SessionError::InvalidConfig("rectified frame must be non-empty"));
        }
        let transform = self
            .rectification
            .transform()
            .ok_or(SessionError::DegenerateQuad)?;
        Ok(Session {
            config: self,
            transform,
            source,
            state: State::Ready,
        })
    }
}

/// A tracking session: `Ready` after `start`, `Tracking` from the first
/// frame on, `Stopped` after `stop` or a fatal error.
pub struct Session<S> {
    config: Config,
    transform: Transform,
    source: S,
    state: State,
}

enum State {
    Ready,
    Tracking(Box<TrackingState>),
    Stopped,
}

/// All mutable per-session buffers, allocated at first-frame time.
struct TrackingState {
    frame_width: usize,
    frame_height: usize,
    gray: DMatrix<u8>,
    prev_pyr: Pyramid,
    curr_pyr: Pyramid,
    detector: Detector,
    flow: flow::Tracker,
    prev_xy: Vec<Point2>,
    curr_xy: Vec<Point2>,
    status: Vec<u8>,
    point_count: usize,
}

impl<S: FrameSource> Session<S> {
    /// Run one tracking cycle if a new frame is available.
    ///
    /// Returns `Ok(None)` when no frame is ready or the session is
    /// stopped, `Ok(Some(motion))` after a completed cycle (zero vectors
    /// included), and a fatal `SessionError` when a frame with invalid or
    /// changed dimensions is delivered, in which case the session stops.
    pub fn step(&mut self) -> Result<Option<MotionVector>, SessionError> {
        let Session {
            source,
            state,
            config,
            transform,
        } = self;
        if let State::Stopped = state {
            return Ok(None);
        }
        let frame = match source.next_frame() {
            Some(frame) => frame,
            None => return Ok(None),
        };
        if frame.width == 0 || frame.height == 0 {
            *state = State::Stopped;
            return Err(SessionError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }
        if let State::Ready = state {
            *state = State::Tracking(Box::new(TrackingState::allocate(
                config,
                frame.width,
                frame.height,
            )));
        }
        let tracking = match state {
            State::Tracking(tracking) => tracking,
            _ => unreachable!("session is in Tracking state here"),
        };
        if (frame.width, frame.height) != (tracking.frame_width, tracking.frame_height) {
            let error = SessionError::DimensionChange {
                expected_width: tracking.frame_width,
                expected_height: tracking.frame_height,
                width: frame.width,
                height: frame.height,
            };
            *state = State::Stopped;
            return Err(error);
        }
        Ok(Some(tracking.cycle(config, transform, &frame)))
    }

    /// Like `step`, forwarding every completed cycle to the sink.
    pub fn step_into(&mut self, sink: &mut impl MotionSink) -> Result<(), SessionError> {
        if let Some(motion) = self.step()? {
            sink.on_motion_vector(motion);
        }
        Ok(())
    }

    /// Stop the session and release the tracking buffers.
    /// Safe to call in any state, idempotent; `step` afterwards is a no-op.
    pub fn stop(&mut self) {
        self.state = State::Stopped;
    }

    /// Read access to the immutable session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl TrackingState {
    fn allocate(config: &Config, frame_width: usize, frame_height: usize) -> Self {
        let out_rows = config.rectification.out_height;
        let out_cols = config.rectification.out_width;
        Self {
            frame_width,
            frame_height,
            gray: DMatrix::zeros(frame_height, frame_width),
            prev_pyr: Pyramid::allocate(config.nb_levels, out_rows, out_cols),
            curr_pyr: Pyramid::allocate(config.nb_levels, out_rows, out_cols),
            detector: Detector::new(
                config.laplacian_threshold,
                config.min_eigen_value_threshold,
                out_rows,
                out_cols,
            ),
            flow: flow::Tracker::new(
                config.win_size,
                config.max_iterations,
                config.epsilon,
                config.min_eigen_threshold,
            ),
            prev_xy: vec![Point2::origin(); config.capacity],
            curr_xy: vec![Point2::origin(); config.capacity],
            status: vec![0; config.capacity],
            point_count: 0,
        }
    }

    /// One full cycle: swap roles, rectify, rebuild the pyramid, reseed
    /// from the previous frame, track, aggregate.
    fn cycle(&mut self, config: &Config, transform: &Transform, frame: &RawFrame) -> MotionVector {
        // Previous/current roles flip by swapping, never by copying.
        mem::swap(&mut self.prev_xy, &mut self.curr_xy);
        mem::swap(&mut self.prev_pyr, &mut self.curr_pyr);

        interop::gray_into(frame.data, frame.width, frame.height, &mut self.gray);
        homography::rectify_into(
            transform,
            config.rectification.origin,
            &self.gray,
            self.curr_pyr.base_mut(),
        );
        self.curr_pyr.rebuild();

        // Re-seed from the frame before the one just rectified. When fewer
        // than `capacity` corners qualify, the remaining slots keep their
        // previous contents: reads are bounded by `point_count` everywhere.
        let found = self.detector.detect(self.prev_pyr.level(0));
        let nb_seeds = found.len().min(config.capacity);
        for (slot, keypoint) in self.prev_xy.iter_mut().zip(found.iter().take(nb_seeds)) {
            *slot = Point2::new(keypoint.x as Float, keypoint.y as Float);
        }
        self.point_count = nb_seeds;

        self.flow.track(
            &self.prev_pyr,
            &self.curr_pyr,
            &self.prev_xy,
            &mut self.curr_xy,
            &mut self.status,
            self.point_count,
        );

        aggregate::mean_displacement(&self.prev_xy, &self.curr_xy, &self.status, self.point_count)
    }
}

// TESTS #############################################################
