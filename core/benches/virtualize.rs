//! Benchmarks for the virtualization pass.
//!
//! Run with: `cargo bench` in the core/ directory.
//!
//! Benchmark groups:
//! 1. obfuscate: parse + virtualize + print for growing function bodies
//! 2. run_generated: reference evaluation of original vs. virtualized code

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use veil_core::{
    Obfuscator, ObfuscatorOptions,
    eval::{self, EvalLimits, HostProfile},
    parser,
};

/// A function with `n` accumulating statements, called once.
fn generate_function(n: usize) -> String {
    let mut source = String::from("local function f(a, b)\n  local acc = 0\n");
    for i in 0..n {
        source.push_str(&format!("  acc = acc + (a * {} - b) % 7\n", i + 1));
    }
    source.push_str("  return acc\nend\nreturn f(3, 2)\n");
    source
}

fn options(dispatch: &str) -> ObfuscatorOptions {
    ObfuscatorOptions::from_json(&format!(
        r#"{{ "seed": "bench", "vm": {{ "dispatch": "{}" }} }}"#,
        dispatch
    ))
    .expect("valid options")
}

fn bench_obfuscate(c: &mut Criterion) {
    let mut group = c.benchmark_group("obfuscate");

    for size in [10, 50, 200] {
        group.throughput(Throughput::Elements(size as u64));
        let source = generate_function(size);
        for dispatch in ["linear", "block"] {
            group.bench_with_input(BenchmarkId::new(dispatch, size), &source, |b, source| {
                b.iter(|| {
                    let out = Obfuscator::new(options(dispatch))
                        .obfuscate(black_box(source))
                        .expect("obfuscation failed");
                    black_box(out.len())
                });
            });
        }
    }

    group.finish();
}

fn bench_run_generated(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_generated");
    let source = generate_function(50);
    let virtualized = Obfuscator::new(options("linear"))
        .obfuscate(&source)
        .expect("obfuscation failed");

    for (name, text) in [("original", &source), ("virtualized", &virtualized)] {
        let chunk = parser::parse(text).expect("parse failed");
        group.bench_function(name, |b| {
            b.iter(|| {
                let outcome = eval::run_chunk(
                    black_box(&chunk),
                    HostProfile::default(),
                    EvalLimits::default(),
                )
                .expect("eval failed");
                black_box(outcome.values.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_obfuscate, bench_run_generated);
criterion_main!(benches);
