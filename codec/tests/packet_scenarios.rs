use std::sync::OnceLock;

use codec::{
    decode_server_packet, encode_server_packet, Delta, DeltaOptions, DynState, EntityId, Limits,
    PacketHeader, Pool, Pools, RecordHistory, Registry, SequenceId, SyncState, Tick,
};
use schema::{FieldCodec, FieldDef, StateSchema};

#[derive(Debug, Clone, Default, PartialEq)]
struct Turret {
    model: u16,
    yaw: f32,
    ammo: u16,
    heat: u8,
}

impl SyncState for Turret {
    fn schema() -> &'static StateSchema<Self> {
        static SCHEMA: OnceLock<StateSchema<Turret>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            StateSchema::builder("turret")
                .immutable(FieldDef::new(
                    "model",
                    FieldCodec::uint(16),
                    |s: &Turret| &s.model,
                    |s: &mut Turret| &mut s.model,
                ))
                .mutable(FieldDef::new(
                    "yaw",
                    FieldCodec::fixed_point(-36_000, 36_000, 100),
                    |s: &Turret| &s.yaw,
                    |s: &mut Turret| &mut s.yaw,
                ))
                .mutable(FieldDef::new(
                    "ammo",
                    FieldCodec::uint(16),
                    |s: &Turret| &s.ammo,
                    |s: &mut Turret| &mut s.ammo,
                ))
                .mutable(FieldDef::new(
                    "heat",
                    FieldCodec::uint(8),
                    |s: &Turret| &s.heat,
                    |s: &mut Turret| &mut s.heat,
                ))
                .build()
                .unwrap()
        })
    }
}

fn registry() -> Registry {
    Registry::new().with_state::<Turret>()
}

/// Packs one delta built against `acked`, decodes it and returns it.
fn send(
    pool: &Pool<codec::Record>,
    history: &RecordHistory,
    current: &Turret,
    tick: Tick,
    acked: Tick,
) -> Option<Delta> {
    let registry = registry();
    let basis = history.basis(pool, acked);
    let index = registry.state_index::<Turret>().unwrap();
    let delta = Delta::build(
        EntityId::new(1),
        tick,
        index,
        current,
        basis.as_deref(),
        DeltaOptions {
            include_immutable: !acked.is_valid(),
            ..DeltaOptions::default()
        },
    )?;
    let header = PacketHeader::new(tick, Tick::INVALID, SequenceId::INVALID);
    let limits = Limits::default();
    let packed = encode_server_packet(&header, &[], &[&delta], &limits).unwrap();
    assert_eq!(packed.deltas, 1);
    let mut pools = Pools::new();
    let packet = decode_server_packet(&packed.bytes, &registry, &limits, &mut pools).unwrap();
    let handle = *packet.deltas.last()?;
    pools.deltas.remove(handle)
}

#[test]
fn first_send_carries_immutable_and_defaults() {
    let mut pool = Pool::new();
    let mut history = RecordHistory::new(16);
    let server = Turret {
        model: 17,
        ..Turret::default()
    };
    history.store(&mut pool, Tick::new(1), &server);

    let delta = send(&pool, &history, &server, Tick::new(1), Tick::INVALID).unwrap();
    let payload = delta.payload().unwrap();
    assert!(payload.has_immutable());

    let mut client = registry().create_state(payload.type_index()).unwrap();
    delta.apply_to(&mut *client);
    assert_eq!(client.downcast_ref::<Turret>(), Some(&server));
}

#[test]
fn two_of_three_fields_changed() {
    let mut pool = Pool::new();
    let mut history = RecordHistory::new(16);
    let before = Turret {
        model: 3,
        yaw: 90.0,
        ammo: 30,
        heat: 0,
    };
    history.store(&mut pool, Tick::new(1), &before);
    let after = Turret {
        yaw: 91.5,
        heat: 12,
        ..before.clone()
    };
    history.store(&mut pool, Tick::new(2), &after);

    let delta = send(&pool, &history, &after, Tick::new(2), Tick::new(1)).unwrap();
    let payload = delta.payload().unwrap();
    assert_eq!(payload.mutable_mask().count(), 2);
    assert!(!payload.has_immutable());

    let mut client = before.clone();
    client.ammo = 29;
    delta.apply_to(&mut client);
    assert_eq!(client.yaw, 91.5);
    assert_eq!(client.heat, 12);
    // Untouched field keeps the client's value.
    assert_eq!(client.ammo, 29);
}

#[test]
fn nothing_changed_sends_nothing() {
    let mut pool = Pool::new();
    let mut history = RecordHistory::new(16);
    let state = Turret::default();
    history.store(&mut pool, Tick::new(4), &state);
    assert!(send(&pool, &history, &state, Tick::new(6), Tick::new(5)).is_none());
}

#[test]
fn aged_out_basis_resends_everything() {
    let mut pool = Pool::new();
    let mut history = RecordHistory::new(2);
    for tick in 1..=6u16 {
        let state = Turret {
            ammo: tick,
            ..Turret::default()
        };
        history.store(&mut pool, Tick::new(u32::from(tick)), &state);
    }
    let current = Turret {
        ammo: 6,
        ..Turret::default()
    };
    let delta = send(&pool, &history, &current, Tick::new(6), Tick::new(2)).unwrap();
    assert_eq!(delta.payload().unwrap().mutable_mask().count(), 3);
    let _: &dyn DynState = delta.payload().unwrap().state();
}
