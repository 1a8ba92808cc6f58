use std::hint::black_box;
use std::sync::OnceLock;

use codec::{
    decode_server_packet, encode_server_packet, Delta, DeltaOptions, EntityId, Limits,
    PacketHeader, Pools, Registry, SequenceId, SyncState, Tick, TypeIndex,
};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use schema::{FieldCodec, FieldDef, StateSchema};

#[derive(Debug, Clone, Default)]
struct Body {
    x: f32,
    y: f32,
    z: f32,
    health: u16,
}

impl SyncState for Body {
    fn schema() -> &'static StateSchema<Self> {
        static SCHEMA: OnceLock<StateSchema<Body>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            let coord = FieldCodec::fixed_point(-1_000_000, 1_000_000, 100);
            StateSchema::builder("body")
                .mutable(FieldDef::new("x", coord, |s: &Body| &s.x, |s: &mut Body| &mut s.x))
                .mutable(FieldDef::new("y", coord, |s: &Body| &s.y, |s: &mut Body| &mut s.y))
                .mutable(FieldDef::new("z", coord, |s: &Body| &s.z, |s: &mut Body| &mut s.z))
                .mutable(FieldDef::new(
                    "health",
                    FieldCodec::uint(16),
                    |s: &Body| &s.health,
                    |s: &mut Body| &mut s.health,
                ))
                .build()
                .unwrap()
        })
    }
}

fn deltas(count: u32) -> Vec<Delta> {
    (1..=count)
        .filter_map(|id| {
            #[allow(clippy::cast_precision_loss)]
            let body = Body {
                x: id as f32,
                y: -(id as f32),
                z: 0.5,
                health: 100,
            };
            Delta::build(
                EntityId::new(id),
                Tick::new(100),
                TypeIndex::new(0),
                &body,
                None,
                DeltaOptions::default(),
            )
        })
        .collect()
}

fn bench_server_packet(c: &mut Criterion) {
    let limits = Limits::default();
    let registry = Registry::new().with_state::<Body>();
    let header = PacketHeader::new(Tick::new(100), Tick::new(98), SequenceId::INVALID);
    let deltas = deltas(200);
    let refs: Vec<&Delta> = deltas.iter().collect();

    let mut group = c.benchmark_group("server_packet");
    group.throughput(Throughput::Elements(refs.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| encode_server_packet(black_box(&header), &[], black_box(&refs), &limits))
    });

    let packed = encode_server_packet(&header, &[], &refs, &limits).unwrap();
    group.bench_function("decode", |b| {
        let mut pools = Pools::new();
        b.iter(|| {
            if let Ok(packet) =
                decode_server_packet(black_box(&packed.bytes), &registry, &limits, &mut pools)
            {
                packet.release(&mut pools);
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_server_packet);
criterion_main!(benches);
