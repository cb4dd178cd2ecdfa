use criterion::{black_box, criterion_group, criterion_main, Criterion};
use switchboard::providers::openai::OpenAiStreamDecoder;
use switchboard::providers::stream::{record_payload, LineBuffer, RecordDecoder};

fn openai_body(records: usize) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..records {
        body.push_str(&format!(
            "data: {{\"id\":\"chatcmpl-1\",\"model\":\"gpt-4o\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"token{} \"}},\"finish_reason\":null}}]}}\n\n",
            i
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn benchmark_stream_parsing(c: &mut Criterion) {
    let record_counts = [100, 1_000, 10_000];
    let chunk_sizes = [64, 1_024, 16_384];

    for &records in &record_counts {
        let body = openai_body(records);
        for &chunk_size in &chunk_sizes {
            c.bench_function(&format!("openai_{}_records_{}b_chunks", records, chunk_size), |b| {
                b.iter(|| {
                    let mut buffer = LineBuffer::new();
                    let mut decoder = OpenAiStreamDecoder::new("gpt-4o".to_string());
                    let mut events = 0usize;
                    for chunk in body.chunks(chunk_size) {
                        for line in buffer.feed(black_box(chunk)) {
                            if let Some(payload) = record_payload(&line) {
                                events += decoder.decode(payload).map(|e| e.len()).unwrap_or(0);
                            }
                        }
                    }
                    events
                })
            });
        }
    }
}

criterion_group!(benches, benchmark_stream_parsing);
criterion_main!(benches);
