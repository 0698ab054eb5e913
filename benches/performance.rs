// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polyframe_script::io::{parse, tokenize};
use polyframe_script::{run_program, MeshBackend, RecordingBackend, RunOptions};

const SIMPLE: &str = "cube([10, 10, 10]);";

const COMPLEX: &str = r#"
    $fn = 24;
    module post(h = 10, r = 1) cylinder(h = h, r = r);
    module ring(n, radius) {
        for (i = [0 : n - 1])
            rotate([0, 0, i * 360 / n]) translate([radius, 0, 0]) children();
    }
    difference() {
        cube([20, 20, 20], center = true);
        ring(8, 6) post(h = 30);
    }
"#;

const RECURSIVE: &str = r#"
    function fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2);
    squares = [for (i = [0 : 200]) if (i % 3 == 0) i * i];
    echo(fib(15), len(squares));
"#;

fn bench_lex(c: &mut Criterion) {
    let mut group = c.benchmark_group("lex");

    for (name, source) in [("simple", SIMPLE), ("complex", COMPLEX)] {
        group.bench_with_input(BenchmarkId::new(name, ""), &source, |b, source| {
            b.iter(|| tokenize(black_box(source)).unwrap());
        });
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for (name, source) in [("simple", SIMPLE), ("complex", COMPLEX)] {
        let tokens = tokenize(source).unwrap();
        group.bench_with_input(BenchmarkId::new(name, ""), &tokens, |b, tokens| {
            b.iter(|| parse(black_box(tokens)).unwrap());
        });
    }

    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let options = RunOptions::default();

    group.bench_function("complex_recording", |b| {
        b.iter(|| {
            let mut backend = RecordingBackend::new();
            run_program(black_box(COMPLEX), &mut backend, &options).unwrap()
        });
    });

    group.bench_function("recursive_functions", |b| {
        b.iter(|| {
            let mut backend = RecordingBackend::new();
            run_program(black_box(RECURSIVE), &mut backend, &options).unwrap()
        });
    });

    group.bench_function("complex_mesh", |b| {
        b.iter(|| {
            let mut backend = MeshBackend::new();
            run_program(black_box(COMPLEX), &mut backend, &options).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lex, bench_parse, bench_evaluate);
criterion_main!(benches);
