#![no_main]

use std::sync::OnceLock;

use codec::{decode_client_packet, decode_server_packet, Limits, Pools};
use demo_schema::demo_protocol;
use libfuzzer_sys::fuzz_target;
use room::{ClientRoom, Outbox, PeerId, Protocol, RoomConfig, ServerRoom};

fn protocol() -> &'static Protocol {
    static PROTOCOL: OnceLock<Protocol> = OnceLock::new();
    PROTOCOL.get_or_init(demo_protocol)
}

fuzz_target!(|data: &[u8]| {
    let limits = Limits::for_testing();
    let registry = protocol().registry();
    let mut pools = Pools::new();
    if let Ok(packet) = decode_server_packet(data, registry, &limits, &mut pools) {
        packet.release(&mut pools);
    }
    if let Ok(packet) = decode_client_packet(data, registry, &limits, &mut pools) {
        packet.release(&mut pools);
    }
    assert_eq!(pools.live(), 0);

    // Whole rooms must survive arbitrary input, including a tick after it.
    let config = RoomConfig::for_testing();
    let (Ok(server), Ok(client)) = (
        ServerRoom::new(protocol().clone(), config.clone()),
        ClientRoom::new(protocol().clone(), config),
    ) else {
        return;
    };
    let mut server = server.with_limits(limits.clone());
    let mut client = client.with_limits(limits);
    let peer = PeerId(1);
    server.add_peer(peer);

    let mut outbox = Outbox::new();
    server.receive(peer, data);
    server.update(&mut outbox);
    client.receive(data);
    client.update(&mut outbox);
});
