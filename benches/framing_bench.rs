//! Benchmarks for frame extraction, validation and fan-out
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use msg_relay::{parse_frame, BroadcastHub, Envelope, FrameExtractor, HubConfig, Message};
use tokio::sync::mpsc;

fn create_stream(count: usize) -> Vec<u8> {
    (0..count)
        .map(|i| {
            format!(
                r#"{{"text":"message {} with {{braces}} in it","audio":"/audio/{}.mp3","meta":{{"n":{}}}}}"#,
                i, i, i
            )
        })
        .collect::<String>()
        .into_bytes()
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let stream = create_stream(1000);
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [16, 256, 8192] {
        group.bench_function(format!("chunk_{}", chunk_size), |b| {
            b.iter(|| {
                let mut extractor = FrameExtractor::new();
                let mut frames = 0;
                for chunk in stream.chunks(chunk_size) {
                    frames += extractor.push(black_box(chunk)).count();
                }
                frames
            })
        });
    }

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    let message = br#"{"text":"hello","audio":"/audio/hello.mp3"}"#;
    group.bench_function("message", |b| b.iter(|| parse_frame(black_box(message))));

    let control = br#"{"type":"reset"}"#;
    group.bench_function("control", |b| b.iter(|| parse_frame(black_box(control))));

    group.finish();
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for subscribers in [1, 100, 1000] {
        let hub = BroadcastHub::new(HubConfig::default());
        let mut receivers: Vec<_> = rt.block_on(async {
            let mut receivers = Vec::with_capacity(subscribers);
            for _ in 0..subscribers {
                let (tx, rx) = mpsc::unbounded_channel::<String>();
                hub.register(tx).await.unwrap();
                receivers.push(rx);
            }
            receivers
        });

        let envelope: Envelope = Message::new("hello").with_audio("/audio/hello.mp3").into();
        group.throughput(Throughput::Elements(subscribers as u64));

        group.bench_function(format!("subscribers_{}", subscribers), |b| {
            b.iter(|| {
                let report = rt.block_on(hub.broadcast(black_box(&envelope))).unwrap();
                for rx in receivers.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
                report
            })
        });

        drop(receivers);
    }

    group.finish();
}

criterion_group!(benches, bench_extraction, bench_validation, bench_broadcast);
criterion_main!(benches);
