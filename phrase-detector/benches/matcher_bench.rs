/// Matcher benchmarks
///
/// Measures scoring and catalog search latency per utterance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phrase_detector::{normalize, score, PhraseCatalog};

const UTTERANCES: [&str; 3] = [
    "send money now",
    "please transfer all funds to the safe account",
    "hello this is your bank calling about a suspicious charge on your card and we need you to confirm your code right away",
];

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for text in UTTERANCES {
        group.bench_with_input(
            BenchmarkId::new("normalize", format!("{}chars", text.len())),
            &text,
            |b, text| {
                b.iter(|| black_box(normalize(black_box(text))));
            },
        );
    }

    group.finish();
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("score");

    for text in UTTERANCES {
        group.bench_with_input(
            BenchmarkId::new("transfer_all_funds", format!("{}chars", text.len())),
            &text,
            |b, text| {
                b.iter(|| black_box(score(black_box("transfer all funds"), black_box(text))));
            },
        );
    }

    group.finish();
}

fn bench_best_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_match");

    // Default catalog and a few hundred synthetic phrases
    let default_catalog = PhraseCatalog::default_phrases();
    let large_catalog = PhraseCatalog::new(
        (0..300).map(|i| format!("urgent request number {} for account {}", i, i * 7)),
    )
    .unwrap();

    for (name, catalog) in [("10_phrases", &default_catalog), ("300_phrases", &large_catalog)] {
        group.bench_with_input(BenchmarkId::new("search", name), catalog, |b, catalog| {
            b.iter(|| black_box(catalog.best_match(black_box(UTTERANCES[1]))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_score, bench_best_match);

criterion_main!(benches);
