//! Parameter parsing / placeholder conversion / signature benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hydrogen_core::params::{convert_named_to_positional, parse_typed_parameters};
use hydrogen_core::signature::QuerySignature;
use hydrogen_core::types::EngineKind;

const PARAMS: &str = r#"{"INTEGER": {"id": 42, "limit": 50}, "STRING": {"name": "ada", "status": "active"}, "FLOAT": {"threshold": 0.75}}"#;
const TEMPLATE: &str = "SELECT * FROM accounts WHERE id = :id AND name = :name AND status = :status AND score > :threshold LIMIT :limit";

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_typed_parameters", |b| {
        b.iter(|| parse_typed_parameters(black_box(PARAMS)).unwrap())
    });
}

fn bench_convert(c: &mut Criterion) {
    let params = parse_typed_parameters(PARAMS).unwrap();
    c.bench_function("convert_named_to_positional/postgres", |b| {
        b.iter(|| {
            convert_named_to_positional(black_box(TEMPLATE), &params, EngineKind::Postgres)
                .unwrap()
        })
    });
    c.bench_function("convert_named_to_positional/sqlite", |b| {
        b.iter(|| {
            convert_named_to_positional(black_box(TEMPLATE), &params, EngineKind::Sqlite).unwrap()
        })
    });
}

fn bench_signature(c: &mut Criterion) {
    c.bench_function("query_signature", |b| {
        b.iter(|| {
            QuerySignature::compute(black_box("main"), black_box(TEMPLATE), Some(PARAMS))
        })
    });
}

criterion_group!(benches, bench_parse, bench_convert, bench_signature);
criterion_main!(benches);
