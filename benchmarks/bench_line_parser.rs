use std::hint::black_box;
use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use errdigest::parsers::error_log::parse_line;
use errdigest::readers::BoundedLineReader;
use errdigest::{aggregate, ContinuationMerger, ErrorLogParser};

const TYPICAL: &str = "[2024-01-01 10:00:00] PHP Warning: Undefined array key \"id\" in /var/www/app/src/Controller/UserController.php:118";
const WITH_URL_AND_SNAPSHOT: &str = "[2024-01-01 10:00:00] Fatal error: Uncaught TypeError: count(): Argument #1 must be of type Countable in /var/www/app/src/Report.php:42  @  https://example.com/reports/monthly?year=2024  @@  exception-5f2b9c1e.html";
const NON_MATCHING: &str = "#3 /var/www/app/vendor/framework/src/Kernel.php(207): Framework\\Kernel->handle(Object(Request))";

fn bench_parse_typical(c: &mut Criterion) {
    c.bench_function("parse_typical", |b| {
        b.iter(|| black_box(parse_line(black_box(TYPICAL))));
    });
}

fn bench_parse_with_url_and_snapshot(c: &mut Criterion) {
    c.bench_function("parse_with_url_and_snapshot", |b| {
        b.iter(|| black_box(parse_line(black_box(WITH_URL_AND_SNAPSHOT))));
    });
}

fn bench_parse_non_matching(c: &mut Criterion) {
    c.bench_function("parse_non_matching", |b| {
        b.iter(|| black_box(parse_line(black_box(NON_MATCHING))));
    });
}

/// A log where most entries repeat and every tenth entry is followed by stack frames.
fn synthetic_log(entries: usize) -> String {
    let mut log = String::new();
    for i in 0..entries {
        let line = if i % 3 == 0 {
            WITH_URL_AND_SNAPSHOT
        } else {
            TYPICAL
        };
        log.push_str(line);
        log.push('\n');
        if i % 10 == 0 {
            log.push_str(NON_MATCHING);
            log.push('\n');
        }
    }
    log
}

fn bench_snapshot_pipeline(c: &mut Criterion) {
    let log = synthetic_log(10_000);
    let parser = ErrorLogParser::default();

    let mut group = c.benchmark_group("snapshot_pipeline");
    group.throughput(Throughput::Bytes(log.len() as u64));
    group.bench_function("read_merge_aggregate", |b| {
        b.iter_batched(
            || Cursor::new(log.as_bytes()),
            |input| {
                let lines = BoundedLineReader::new(input, 4096).map_while(Result::ok);
                let merger = ContinuationMerger::new(lines, &parser);
                black_box(aggregate(merger))
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_typical,
    bench_parse_with_url_and_snapshot,
    bench_parse_non_matching,
    bench_snapshot_pipeline
);
criterion_main!(benches);
