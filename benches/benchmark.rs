use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use confreg::wire::{ByteOrder, EnvelopeWriter, LogicalType};
use confreg::{ItemDef, Number, Registry};

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            vec![
                ItemDef::new("Samples", "Integer", 1024),
                ItemDef::new("Gain", "Double", 16).bounds("-1", "1"),
                ItemDef::new("Label", "Text", 64),
            ],
            Some("Bench"),
        )
        .expect("registration");
    registry.finalize(None).expect("finalize");
    registry
}

fn text_assignment(c: &mut Criterion) {
    let registry = registry();
    c.bench_function("single element", |b| {
        b.iter(|| registry.apply_text(black_box("Samples 17: 42")))
    });
    c.bench_function("whole array", |b| {
        b.iter(|| registry.apply_text(black_box("Samples all: 7")))
    });
    let list: String = (0..16).map(|i| format!("{}.{}", i % 2, i)).collect::<Vec<_>>().join(", ");
    let statement = format!("Gain {}", list);
    c.bench_function("clamped reals", |b| b.iter(|| registry.apply_text(black_box(&statement))));
    c.bench_function("text", |b| {
        b.iter(|| registry.apply_text(black_box("Label \"a quoted\\tvalue\"")))
    });
}

fn binary_assignment(c: &mut Criterion) {
    let registry = registry();
    let values: Vec<Number> = (0..1024).map(Number::Signed).collect();
    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .numbers(LogicalType::Signed, 4, false, &values)
        .expect("numbers")
        .finish();
    c.bench_function("binary array", |b| b.iter(|| registry.apply_binary(black_box(&buffer))));
}

criterion_group!(benches, text_assignment, binary_assignment);
criterion_main!(benches);
