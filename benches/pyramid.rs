// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{criterion_group, criterion_main, Criterion};
use glyph_flow_rs::core::multires::Pyramid;

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("pyramid rebuild 3 240x320", |b| {
        let mut pyr = Pyramid::allocate(3, 240, 320);
        pyr.base_mut().fill(128);
        b.iter(|| pyr.rebuild())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
