//! 분할/조립 처리율 벤치마크

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use fdp::config::ReassemblyConfig;
use fdp::{FragmentHeader, FragmentOutcome, Packetizer, Reassembler, DEFAULT_MAX_PAYLOAD};

const FRAME_SIZES: [usize; 3] = [2048, 64 * 1024, 1024 * 1024];

fn bench_prepare(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare");

    for size in FRAME_SIZES {
        let data = vec![0xA5u8; size];
        let mut packetizer = Packetizer::new(DEFAULT_MAX_PAYLOAD);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            let mut frame_id = 0u32;
            b.iter(|| {
                frame_id = frame_id.wrapping_add(1);
                let frame = packetizer.prepare(black_box(data), frame_id).unwrap();
                black_box(frame.wire_bytes())
            });
        });
    }

    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble");

    for size in FRAME_SIZES {
        let data = vec![0x5Au8; size];
        let mut packetizer = Packetizer::new(DEFAULT_MAX_PAYLOAD);
        let datagrams: Vec<Vec<u8>> = packetizer
            .prepare(&data, 0)
            .unwrap()
            .iter()
            .map(|f| f.to_datagram())
            .collect();

        let mut reassembler = Reassembler::new(ReassemblyConfig::default());

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &datagrams, |b, datagrams| {
            let mut frame_id = 0u32;
            b.iter(|| {
                frame_id = frame_id.wrapping_add(1);
                // 역순으로 넣어 순서 무관 경로를 태움
                for datagram in datagrams.iter().rev() {
                    let (mut header, payload) = FragmentHeader::split_datagram(datagram).unwrap();
                    header.frame_id = frame_id;
                    let outcome = reassembler.add_fragment(header, payload);
                    if let FragmentOutcome::Complete(frame) = outcome {
                        black_box(frame.data.len());
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_prepare, bench_reassemble);
criterion_main!(benches);
