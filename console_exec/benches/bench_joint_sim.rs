//! # Joint Simulator Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use console_lib::joint_sim::{step, JointSim};

fn joint_sim_benchmark(c: &mut Criterion) {
    c.bench_function("joint_sim::step", |b| {
        b.iter(|| step(black_box(12.5), black_box(90.0), black_box(50.0)))
    });

    // A full demo, 240 ticks at 50 ms
    c.bench_function("JointSim::demo", |b| {
        b.iter(|| {
            let mut sim = JointSim::default();
            sim.start_demo();
            while sim.demo_running() {
                black_box(sim.tick());
            }
        })
    });
}

criterion_group!(benches, joint_sim_benchmark);
criterion_main!(benches);
