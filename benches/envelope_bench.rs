use criterion::{criterion_group, criterion_main, Criterion};
use bridge_protocol::core::serialization::{self, ContentEncoding};
use bridge_protocol::protocol::message::{MessageType, Request};

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let requests = vec![
        Request::new(MessageType::Message, "ping"),
        Request::new(MessageType::Initialize, "{\"name\":\"EU #1\",\"slots\":64}"),
        Request::new(MessageType::Message, "a".repeat(1024)),
    ];

    for (label, encoding) in [("text", ContentEncoding::Text), ("code_points", ContentEncoding::CodePoints)] {
        group.bench_function(format!("encode_{label}"), |b| {
            b.iter(|| {
                for request in &requests {
                    let _ = serialization::encode_with(request, encoding);
                }
            })
        });
    }

    #[allow(clippy::unwrap_used)]
    let blob = serialization::encode_with(&requests[2], ContentEncoding::CodePoints).unwrap();
    group.bench_function("decode_code_points", |b| {
        b.iter(|| {
            let _ = serialization::decode(&blob);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_envelope);
criterion_main!(benches);
