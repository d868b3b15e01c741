// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenarios driving a session through its public API only.

use glyph_flow_rs::core::homography::Rectification;
use glyph_flow_rs::misc::type_aliases::Float;
use glyph_flow_rs::session::{
    Config, FrameSource, MotionSink, MotionVector, RawFrame, SessionError,
};

const WIDTH: usize = 96;
const HEIGHT: usize = 96;
const BLOBS: [(Float, Float); 4] = [(24.0, 24.0), (60.0, 28.0), (32.0, 60.0), (64.0, 64.0)];

/// Frame source replaying a fixed list of RGBA frames.
struct Replay {
    frames: Vec<(Vec<u8>, usize, usize)>,
    index: usize,
}

impl Replay {
    fn new(frames: Vec<(Vec<u8>, usize, usize)>) -> Self {
        Self { frames, index: 0 }
    }
}

impl FrameSource for Replay {
    fn next_frame(&mut self) -> Option<RawFrame<'_>> {
        let frame = self.frames.get(self.index)?;
        self.index += 1;
        Some(RawFrame {
            data: &frame.0,
            width: frame.1,
            height: frame.2,
        })
    }
}

/// RGBA frame of a black background with smooth bright blobs, every blob
/// shifted by `(dx, dy)` from its reference center. The background is
/// black so the zero-filled warp border introduces no edge of its own.
fn blob_frame(dx: Float, dy: Float) -> (Vec<u8>, usize, usize) {
    let mut data = Vec::with_capacity(4 * WIDTH * HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let mut v = 0.0;
            for &(cx, cy) in BLOBS.iter() {
                let ddx = x as Float - (cx + dx);
                let ddy = y as Float - (cy + dy);
                v += 200.0 * (-0.02 * (ddx * ddx + ddy * ddy)).exp();
            }
            let v = v.min(255.0) as u8;
            data.extend_from_slice(&[v, v, v, 255]);
        }
    }
    (data, WIDTH, HEIGHT)
}

fn flat_frame(width: usize, height: usize) -> (Vec<u8>, usize, usize) {
    (vec![128; 4 * width * height], width, height)
}

fn test_config() -> Config {
    Config {
        rectification: Rectification::full_frame(WIDTH, HEIGHT),
        ..Config::default()
    }
}

#[test]
fn translation_is_recovered_on_the_third_cycle() {
    let frames = vec![blob_frame(0.0, 0.0), blob_frame(0.0, 0.0), blob_frame(3.0, 0.0)];
    let mut session = test_config().start(Replay::new(frames)).unwrap();

    // First cycle: the previous pyramid is still blank, nothing to seed.
    assert_eq!(session.step().unwrap(), Some(MotionVector::zeros()));

    // Second cycle: identical frames, no drift expected.
    let motion = session.step().unwrap().unwrap();
    assert!(motion.norm() < 0.1, "drift {} on identical frames", motion.norm());

    // Third cycle: every blob moved 3 pixels to the right.
    let motion = session.step().unwrap().unwrap();
    assert!((motion.x - 3.0).abs() < 0.5, "dx = {}, expected ~3", motion.x);
    assert!(motion.y.abs() < 0.5, "dy = {}, expected ~0", motion.y);
}

#[test]
fn textureless_stream_yields_zero_vectors() {
    let frames = vec![flat_frame(WIDTH, HEIGHT); 3];
    let mut session = test_config().start(Replay::new(frames)).unwrap();
    for _ in 0..3 {
        assert_eq!(session.step().unwrap(), Some(MotionVector::zeros()));
    }
    // Source exhausted afterwards.
    assert!(session.step().unwrap().is_none());
}

#[test]
fn sink_receives_one_vector_per_cycle() {
    struct Collect(Vec<MotionVector>);
    impl MotionSink for Collect {
        fn on_motion_vector(&mut self, motion: MotionVector) {
            self.0.push(motion);
        }
    }

    let frames = vec![blob_frame(0.0, 0.0), blob_frame(0.0, 0.0), blob_frame(3.0, 0.0)];
    let mut session = test_config().start(Replay::new(frames)).unwrap();
    let mut sink = Collect(Vec::new());
    for _ in 0..5 {
        session.step_into(&mut sink).unwrap();
    }
    // Three frames, three vectors; the two exhausted steps deliver nothing.
    assert_eq!(sink.0.len(), 3);
    assert!((sink.0[2].x - 3.0).abs() < 0.5);
}

#[test]
fn dimension_change_stops_the_session() {
    let frames = vec![flat_frame(WIDTH, HEIGHT), flat_frame(48, 48), flat_frame(WIDTH, HEIGHT)];
    let mut session = test_config().start(Replay::new(frames)).unwrap();
    session.step().unwrap();
    assert!(matches!(
        session.step(),
        Err(SessionError::DimensionChange { width: 48, height: 48, .. })
    ));
    // Stopped for good, even though the source has a matching frame left.
    assert!(session.step().unwrap().is_none());
}

#[test]
fn stop_is_effective_and_idempotent() {
    let frames = vec![blob_frame(0.0, 0.0); 4];
    let mut session = test_config().start(Replay::new(frames)).unwrap();
    assert!(session.step().unwrap().is_some());
    session.stop();
    session.stop();
    assert!(session.step().unwrap().is_none());
    session.stop();
    assert!(session.step().unwrap().is_none());
}

#[test]
fn overhead_rectification_runs_end_to_end() {
    // Reference geometry: 640x480 frames, 320x240 rectified working frame.
    let frames = vec![flat_frame(640, 480); 2];
    let mut session = Config::default().start(Replay::new(frames)).unwrap();
    assert_eq!(session.step().unwrap(), Some(MotionVector::zeros()));
    assert_eq!(session.step().unwrap(), Some(MotionVector::zeros()));
}
