//! Control hot-path benchmarks: PID cycle and steering mix.
//!
//! Both run 50 times per 20 ms tick budget; keep them allocation-free.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use terra_control_unit::control::pid::{pid_compute, PidGains, PidState};
use terra_control_unit::control::steering::{reduction_multiplier, steering_mix};

fn bench_pid(c: &mut Criterion) {
    let gains = PidGains {
        kp: 1.2,
        ki: 0.4,
        kd: 0.05,
        integral_limit: 1.0,
        accel_max: 1.0,
        decel_max: 2.0,
    };
    c.bench_function("pid_compute", |b| {
        let mut state = PidState::default();
        b.iter(|| {
            let out = pid_compute(
                black_box(&mut state),
                black_box(&gains),
                black_box(0.37),
                black_box(0.02),
            );
            black_box(out)
        })
    });
}

fn bench_steering(c: &mut Criterion) {
    c.bench_function("steering_mix", |b| {
        b.iter(|| black_box(steering_mix(black_box(0.8), black_box(0.35))))
    });

    c.bench_function("reduction_multiplier", |b| {
        b.iter(|| {
            black_box(reduction_multiplier(
                black_box(0.6),
                black_box(0.2),
                black_box(1.0),
                black_box(0.7),
            ))
        })
    });
}

criterion_group!(benches, bench_pid, bench_steering);
criterion_main!(benches);
