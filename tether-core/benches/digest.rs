//! Digest and expression benchmarks
//!
//! Measures:
//! - A clean digest over growing watcher counts
//! - A digest where one watcher out of many is dirty
//! - Expression compilation with and without the parser cache
//! - Evaluation of a compiled member/call chain

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tether_core::{Parser, Scope, Value};

fn scope_with_watchers(count: usize) -> Scope {
    let scope = Scope::new();
    for i in 0..count {
        let key = format!("value{i}");
        scope.set(key.clone(), i);
        scope.watch(move |s| Ok(s.get(&key)), |_, _, _| Ok(()), false);
    }
    scope
}

fn bench_clean_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("clean_digest");

    for count in [10, 100, 1000] {
        let scope = scope_with_watchers(count);
        scope.digest().ok();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| scope.digest().ok())
        });
    }

    group.finish();
}

fn bench_single_dirty_watcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_dirty_watcher");

    for count in [100, 1000] {
        let scope = scope_with_watchers(count);
        scope.digest().ok();
        let mut tick = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                tick += 1;
                scope.set("value0", tick as f64);
                scope.digest().ok()
            })
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let source = "user.name.first + ' ' + user.name.last == 'a b' ? items[0] : fallback";

    c.bench_function("compile_uncached", |b| {
        let parser = Parser::new();
        b.iter(|| {
            parser.clear_cache();
            parser.parse(black_box(source)).ok()
        })
    });

    c.bench_function("compile_cached", |b| {
        let parser = Parser::new();
        parser.parse(source).ok();
        b.iter(|| parser.parse(black_box(source)).ok())
    });
}

fn bench_eval(c: &mut Criterion) {
    let scope = Scope::new();
    scope.set(
        "user",
        Value::from(serde_json::json!({"name": {"first": "Ada", "last": "Lovelace"}})),
    );
    scope.set(
        "greet",
        Value::function("greet", |_, args| {
            let name = args.first().cloned().unwrap_or(Value::Undefined);
            Ok(Value::from(format!("hello {name}")))
        }),
    );
    let parser = Parser::new();
    let expression = match parser.parse("greet(user.name.first + ' ' + user.name.last)") {
        Ok(expression) => expression,
        Err(err) => panic!("benchmark expression failed to compile: {err}"),
    };
    let data = scope.data();

    c.bench_function("eval_call_chain", |b| {
        b.iter(|| expression.eval(black_box(&data), None).ok())
    });
}

criterion_group!(
    benches,
    bench_clean_digest,
    bench_single_dirty_watcher,
    bench_compile,
    bench_eval
);
criterion_main!(benches);
