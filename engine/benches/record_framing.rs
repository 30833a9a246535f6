use criterion::{criterion_group, criterion_main, Criterion};
use tls_engine::handshake::message::HandshakeType;
use tls_engine::record::framing::{read_dtls_header, read_tls_header, write_dtls, write_tls};
use tls_engine::record::{fragment, read_tls_record, write_tls_header, ContentType};
use tls_engine::ProtocolVersion;
use tls_wire::{Reader, Writer};

fn benchmark_fragmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmentation");
    let data = vec![0x42u8; 1 << 16];

    group.bench_function("fragment into 16KiB records", |b| {
        b.iter(|| fragment(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &data, 1 << 14))
    });

    group.finish();
}

fn benchmark_tls_record_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("tls_record_header");
    let payload = vec![0xABu8; 512];

    group.bench_function("write", |b| {
        b.iter(|| {
            let mut w = Writer::new();
            write_tls_header(&mut w, ContentType::Handshake, ProtocolVersion::TLS1_2, &payload);
            w.into_bytes()
        })
    });

    let mut w = Writer::new();
    write_tls_header(&mut w, ContentType::Handshake, ProtocolVersion::TLS1_2, &payload);
    let bytes = w.into_bytes();

    group.bench_function("read", |b| {
        b.iter(|| {
            let mut r = Reader::new(&bytes);
            read_tls_record(&mut r).unwrap()
        })
    });

    group.finish();
}

fn benchmark_handshake_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake_header");
    let body = vec![0x11u8; 256];

    group.bench_function("write_tls", |b| {
        b.iter(|| {
            let mut w = Writer::new();
            write_tls(&mut w, HandshakeType::ClientHello, &body);
            w.into_bytes()
        })
    });

    group.bench_function("write_dtls", |b| {
        b.iter(|| {
            let mut w = Writer::new();
            write_dtls(&mut w, HandshakeType::ClientHello, 0, &body);
            w.into_bytes()
        })
    });

    let mut tls_w = Writer::new();
    write_tls(&mut tls_w, HandshakeType::ClientHello, &body);
    let tls_bytes = tls_w.into_bytes();

    let mut dtls_w = Writer::new();
    write_dtls(&mut dtls_w, HandshakeType::ClientHello, 0, &body);
    let dtls_bytes = dtls_w.into_bytes();

    group.bench_function("read_tls", |b| {
        b.iter(|| {
            let mut r = Reader::new(&tls_bytes);
            read_tls_header(&mut r).unwrap()
        })
    });

    group.bench_function("read_dtls", |b| {
        b.iter(|| {
            let mut r = Reader::new(&dtls_bytes);
            read_dtls_header(&mut r).unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_fragmentation, benchmark_tls_record_header, benchmark_handshake_header);
criterion_main!(benches);
