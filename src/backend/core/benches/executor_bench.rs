//! Benchmarks for argv construction, progress scanning and lane selection.
use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dbvault_core::backup::{DatabaseConnection, DatabaseEngine};
use dbvault_core::executor::args::{dump_invocation, restore_invocations};
use dbvault_core::executor::{
    BackupOptions, DumpFormat, MysqlDumpProgress, PgDumpProgress, ProgressEstimator, RestoreOptions,
};
use dbvault_core::jobs::{LaneSelector, LaneWeights};

fn bench_dump_invocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("dump_invocation");
    let output = Path::new("/var/backups/app.dump");
    for engine in [DatabaseEngine::Postgres, DatabaseEngine::Mysql] {
        let conn = DatabaseConnection::new("bench", engine, "db.internal", "backup", "app")
            .with_password("hunter2")
            .params();
        let options = BackupOptions {
            include_tables: (0..20).map(|i| format!("table_{}", i)).collect(),
            exclude_tables: vec!["audit_log".into()],
            format: if engine == DatabaseEngine::Postgres { DumpFormat::Custom } else { DumpFormat::Plain },
            ..BackupOptions::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(engine.as_str()), &options, |b, opts| {
            b.iter(|| black_box(dump_invocation(&conn, opts, output)));
        });
    }
    group.finish();
}

fn bench_restore_invocations(c: &mut Criterion) {
    let conn = DatabaseConnection::new("bench", DatabaseEngine::Postgres, "db.internal", "backup", "app").params();
    let options = RestoreOptions { drop_existing: true, ..RestoreOptions::default() };
    c.bench_function("restore_invocations_plain_pg", |b| {
        b.iter(|| black_box(restore_invocations(&conn, Path::new("/var/backups/app.sql"), &options)));
    });
}

fn bench_progress_scanning(c: &mut Criterion) {
    let mut group = c.benchmark_group("progress_scanning");
    let pg_lines: Vec<String> = (0..1_000)
        .map(|i| {
            if i % 10 == 0 {
                format!("pg_dump: dumping contents of table \"public.t{}\"", i)
            } else {
                format!("pg_dump: reading dependency data {}", i)
            }
        })
        .collect();
    let mysql_lines: Vec<String> = (0..1_000)
        .map(|i| format!("-- Retrieving table structure for table `t{}`...", i))
        .collect();

    group.throughput(Throughput::Elements(1_000));
    group.bench_function("pg_dump", |b| {
        b.iter(|| {
            let mut estimator = PgDumpProgress::new();
            for line in &pg_lines {
                black_box(estimator.observe(line));
            }
        });
    });
    group.bench_function("mysqldump", |b| {
        b.iter(|| {
            let mut estimator = MysqlDumpProgress::new();
            for line in &mysql_lines {
                black_box(estimator.observe(line));
            }
        });
    });
    group.finish();
}

fn bench_lane_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("lane_selection");
    for rounds in [100, 1_000] {
        group.throughput(Throughput::Elements(rounds as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rounds), &rounds, |b, &n| {
            let mut selector = LaneSelector::new(LaneWeights::default());
            b.iter(|| {
                for _ in 0..n {
                    black_box(selector.next_order());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_dump_invocation,
    bench_restore_invocations,
    bench_progress_scanning,
    bench_lane_selection
);
criterion_main!(benches);
