//! Report rendering benchmark suite
//!
//! Aggregation of a results directory and per-case table rendering.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ftle_contract_bench::aggregate::{load_records, AggregatedRecord};
use ftle_contract_bench::report::render_sections;
use std::fs;
use tempfile::TempDir;

fn records(cases: usize, packages: usize) -> Vec<AggregatedRecord> {
    (0..cases)
        .flat_map(|c| {
            (0..packages).map(move |p| AggregatedRecord {
                package: format!("pkg-{p}"),
                case_id: format!("case_{c:03}"),
                description: format!("Case {c}"),
                iterates_per_run: 50,
                num_benchmark_runs: 3,
                mean_iter_s: 0.01 * (p + 1) as f64,
                std_iter_s: (p % 2 == 0).then_some(0.001),
                mae: (p % 3 == 0).then_some(1e-5),
            })
        })
        .collect()
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_sections");
    for cases in [1, 10, 100] {
        let recs = records(cases, 5);
        group.bench_with_input(BenchmarkId::from_parameter(cases), &recs, |b, recs| {
            b.iter(|| black_box(render_sections(black_box(recs), "pkg-0")))
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_records");
    group.sample_size(20);

    for files in [10, 100] {
        let dir = TempDir::new().unwrap();
        for i in 0..files {
            let doc = serde_json::json!({
                "parameters": { "iterates_per_run": 10, "num_benchmark_runs": 3 },
                "timings": {
                    "warmup_time": 0.1,
                    "loop_times": [1.0, 1.1, 0.9],
                    "per_iter_times": [0.1, 0.11, 0.09],
                    "mean_loop_time": 1.0,
                    "mean_per_iter_time": 0.1,
                    "std_loop_time": 0.08,
                    "std_per_iter_time": 0.008
                },
                "metadata": {
                    "package_name": format!("pkg-{}", i % 5),
                    "case_id": format!("case_{}", i / 5),
                    "case_description": "bench",
                    "case_flow_type": "predefined"
                }
            });
            let name = format!("pkg-{}_case_{}_results.json", i % 5, i / 5);
            fs::write(dir.path().join(name), doc.to_string()).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(files), &dir, |b, dir| {
            b.iter(|| black_box(load_records(dir.path()).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_render, bench_aggregate);
criterion_main!(benches);
