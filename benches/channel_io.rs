use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shared_channels::{Channel, ChannelSpec, Role, SlotWidth, Table};

fn bench_channel_io(c: &mut Criterion) {
    let name = format!("bench_{}", std::process::id());
    let authority = Table::open(&name, Role::Authority, 8, SlotWidth::I16, true).unwrap();
    let participant = Table::open(&name, Role::Participant, 8, SlotWidth::I16, false).unwrap();

    let plain = Channel::bind(&participant, 0, ChannelSpec::default()).unwrap();
    let scaled =
        Channel::bind(&participant, 1, ChannelSpec::default().normalized(0.0, 100.0)).unwrap();
    let reader = Channel::bind(&authority, 0, ChannelSpec::default()).unwrap();

    c.bench_function("channel_write", |b| {
        let mut v = 0;
        b.iter(|| {
            v = (v + 1) % 4096;
            plain.write(black_box(v)).unwrap()
        })
    });

    c.bench_function("channel_write_normalized", |b| {
        b.iter(|| scaled.write(black_box(42.5)).unwrap())
    });

    c.bench_function("channel_read", |b| b.iter(|| reader.read().unwrap()));

    c.bench_function("table_snapshot", |b| b.iter(|| authority.channels().unwrap()));
}

criterion_group!(benches, bench_channel_io);
criterion_main!(benches);
