use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nfdebug_core::value::ValueHandle;
use nfdebug_core::wire::{crc, Command, Flags, FrameDecoder, HandleWidth, Packet, WireReader, WireWriter};

fn bench_packet_encoding(c: &mut Criterion) {
    let payload = vec![0xA5; 1024];
    c.bench_function("packet_encode_1k", |b| {
        b.iter(|| {
            let packet = Packet::new(Command::WRITE_MEMORY, Flags::NONE, 42, 0, black_box(payload.clone()));
            black_box(packet.to_bytes())
        })
    });
}

fn bench_frame_decoding(c: &mut Criterion) {
    let stream: Vec<u8> = (0..32u16)
        .flat_map(|seq| Packet::new(Command::MESSAGE, Flags::NONE, seq, 0, vec![b'x'; 64]).to_bytes())
        .collect();
    c.bench_function("frame_decode_32_packets", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.push(black_box(&stream));
            std::iter::from_fn(|| decoder.next_frame()).count()
        })
    });
}

fn bench_crc(c: &mut Criterion) {
    let data = vec![0x5A; 64 * 1024];
    c.bench_function("crc_64k", |b| b.iter(|| crc::checksum(black_box(&data))));
}

fn bench_value_handle_decoding(c: &mut Criterion) {
    let mut w = WireWriter::new(HandleWidth::Narrow);
    w.put(&ValueHandle::default());
    let bytes = w.into_bytes();
    c.bench_function("value_handle_decode", |b| {
        b.iter(|| {
            let handle: ValueHandle = WireReader::new(black_box(&bytes), HandleWidth::Narrow).get().unwrap();
            black_box(handle)
        })
    });
}

criterion_group!(benches, bench_packet_encoding, bench_frame_decoding, bench_crc, bench_value_handle_decoding);
criterion_main!(benches);
