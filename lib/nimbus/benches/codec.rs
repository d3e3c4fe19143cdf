use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nimbus::wire::{Message, NameMsg, PacketHeader, PipeMsg};
use rand::{Rng, SeedableRng};

fn random_block_add(rng: &mut rand::rngs::StdRng) -> NameMsg {
    let len = rng.gen_range(1..4);
    NameMsg::BlockAddRep {
        result: 0,
        file_id: rng.gen(),
        block_id: rng.gen(),
        block_size: rng.gen_range(1..1 << 20),
        pipeline: (0..len).map(|_| rng.gen()).collect(),
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    let msgs: Vec<NameMsg> = (0..64).map(|_| random_block_add(&mut rng)).collect();

    c.bench_function("encode_block_add_rep", |b| {
        b.iter(|| {
            for msg in &msgs {
                black_box(msg.to_bytes());
            }
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let frames: Vec<Vec<u8>> = (0..64)
        .map(|_| random_block_add(&mut rng).to_bytes())
        .collect();

    c.bench_function("decode_block_add_rep", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(NameMsg::decode(frame).unwrap());
            }
        })
    });
}

fn bench_packet_header(c: &mut Criterion) {
    let header = PipeMsg::DataPacket(PacketHeader {
        block_id: 11,
        packet_id: 42,
        segment_id: 1,
        last_segment: true,
        last_packet: false,
        packet_size: 1000,
    });
    let bytes = header.to_bytes();

    c.bench_function("packet_header_roundtrip", |b| {
        b.iter(|| {
            let encoded = black_box(&header).to_bytes();
            black_box(PipeMsg::decode(&encoded).unwrap());
            black_box(PipeMsg::decode(&bytes).unwrap());
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_packet_header);
criterion_main!(benches);
