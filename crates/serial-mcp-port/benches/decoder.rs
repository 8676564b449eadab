use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serial_mcp_core::{DisplayFormat, NewlinePolicy};
use serial_mcp_port::StreamDecoder;

/// Typical sensor chatter: short CRLF-terminated lines with some non-ASCII.
fn sample_stream(lines: usize) -> Vec<u8> {
    (0..lines)
        .map(|i| format!("t={i} temp=23.{}℃ rh=41%\r\n", i % 10))
        .collect::<String>()
        .into_bytes()
}

fn bench_text_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_decoding");
    let data = sample_stream(1000);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [1usize, 16, 256, 4096].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut decoder = StreamDecoder::new(DisplayFormat::Text, NewlinePolicy::Any);
                    for chunk in data.chunks(size) {
                        black_box(decoder.feed(black_box(chunk)));
                    }
                    black_box(decoder.flush());
                });
            },
        );
    }
    group.finish();
}

fn bench_binary_decoding(c: &mut Criterion) {
    let data = sample_stream(1000);

    c.bench_function("binary_decoding", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new(DisplayFormat::Binary, NewlinePolicy::Any);
            for chunk in data.chunks(256) {
                for event in decoder.feed(black_box(chunk)) {
                    black_box(event.text());
                }
            }
        });
    });
}

criterion_group!(benches, bench_text_decoding, bench_binary_decoding);
criterion_main!(benches);
