//! Four-pass packet encoding and decoding.
//!
//! ```text
//! [header][early events][payload][fill events]
//! ```
//!
//! The early event pass may fill up to `Limits::early_event_bytes`; the
//! payload may fill up to the packet cap minus the trailing event count; the
//! fill pass continues the same event list up to the packet cap. Server
//! payloads are one delta list. Client payloads are a command update list
//! followed by a view list.
//!
//! Decoding parses the whole packet first and only then moves its events,
//! deltas and command updates into the caller's [`Pools`], so a corrupt
//! packet leaves the pools untouched.

use bitstream::{BitReader, BitWriter};
use tracing::trace;
use wire::{pack_list, unpack_list, DecodeError, Limits, ListBudget, PacketHeader};

use crate::command::CommandUpdate;
use crate::delta::Delta;
use crate::error::CodecResult;
use crate::event::Event;
use crate::pool::{Handle, Pools};
use crate::registry::Registry;
use crate::view::ViewEntry;

/// Decoded server-to-client packet. Events and deltas are pooled.
#[derive(Debug, Clone)]
pub struct ServerPacket {
    pub header: PacketHeader,
    pub events: Vec<Handle<Event>>,
    pub deltas: Vec<Handle<Delta>>,
}

impl ServerPacket {
    /// Returns everything the packet still holds to `pools`.
    pub fn release(self, pools: &mut Pools) {
        pools.events.release(self.events);
        pools.deltas.release(self.deltas);
    }
}

/// Decoded client-to-server packet. Events and command updates are pooled.
#[derive(Debug, Clone)]
pub struct ClientPacket {
    pub header: PacketHeader,
    pub events: Vec<Handle<Event>>,
    pub commands: Vec<Handle<CommandUpdate>>,
    pub view: Vec<ViewEntry>,
}

impl ClientPacket {
    /// Returns everything the packet still holds to `pools`.
    pub fn release(self, pools: &mut Pools) {
        pools.events.release(self.events);
        pools.updates.release(self.commands);
    }
}

/// Bytes of an encoded packet and how much of each input list made it in.
///
/// Inputs are packed as prefixes, so a count of `n` means the first `n`
/// items were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub bytes: Vec<u8>,
    pub events: usize,
    pub deltas: usize,
    pub commands: usize,
    pub view: usize,
}

fn event_budget(limits: &Limits, end_bytes: usize) -> ListBudget {
    ListBudget::new(limits.max_event_bytes, end_bytes, limits.list_items())
}

fn delta_budget(limits: &Limits) -> ListBudget {
    ListBudget::new(limits.max_delta_bytes, limits.payload_end(), limits.list_items())
}

fn command_budget(limits: &Limits) -> ListBudget {
    ListBudget::new(
        limits.max_command_update_bytes,
        limits.command_section_bytes,
        limits.list_items(),
    )
}

fn view_budget(limits: &Limits) -> ListBudget {
    ListBudget::new(limits.max_view_entry_bytes, limits.payload_end(), limits.list_items())
}

/// Runs the header, early event, payload and fill event passes.
fn encode_passes<P>(
    header: &PacketHeader,
    events: &[&Event],
    limits: &Limits,
    payload: impl FnOnce(&mut BitWriter) -> CodecResult<P>,
) -> CodecResult<(Vec<u8>, usize, P)> {
    let mut writer = BitWriter::with_capacity(limits.max_packet_bytes);
    header.encode(&mut writer)?;

    let early = pack_list(
        &mut writer,
        event_budget(limits, limits.early_event_bytes),
        events.iter(),
        |w, event: &&Event| event.encode(w),
    )?;

    let packed = payload(&mut writer)?;

    let fill = pack_list(
        &mut writer,
        event_budget(limits, limits.max_packet_bytes),
        events[early..].iter(),
        |w, event: &&Event| event.encode(w),
    )?;

    Ok((writer.finish(), early + fill, packed))
}

fn decode_passes<P>(
    bytes: &[u8],
    registry: &Registry,
    limits: &Limits,
    payload: impl FnOnce(&mut BitReader<'_>, &PacketHeader) -> CodecResult<P>,
) -> CodecResult<(PacketHeader, Vec<Event>, P)> {
    if bytes.len() > limits.max_packet_bytes {
        return Err(DecodeError::PacketTooLarge {
            actual: bytes.len(),
            limit: limits.max_packet_bytes,
        }
        .into());
    }
    let mut reader = BitReader::new(bytes);
    let header = PacketHeader::decode(&mut reader)?;
    let mut events = unpack_list(
        &mut reader,
        event_budget(limits, limits.early_event_bytes),
        |r| Event::decode(r, registry),
    )?;
    let decoded = payload(&mut reader, &header)?;
    let fill = unpack_list(
        &mut reader,
        event_budget(limits, limits.max_packet_bytes),
        |r| Event::decode(r, registry),
    )?;
    events.extend(fill);
    reader.finish()?;
    Ok((header, events, decoded))
}

/// Encodes a server packet. `deltas` must already be in send order
/// (removed, frozen, active).
pub fn encode_server_packet(
    header: &PacketHeader,
    events: &[&Event],
    deltas: &[&Delta],
    limits: &Limits,
) -> CodecResult<Packed> {
    let (bytes, events, deltas) = encode_passes(header, events, limits, |writer| {
        pack_list(writer, delta_budget(limits), deltas, |w, delta: &&Delta| {
            delta.encode(w)
        })
    })?;
    trace!(bytes = bytes.len(), events, deltas, "packed server packet");
    Ok(Packed {
        bytes,
        events,
        deltas,
        commands: 0,
        view: 0,
    })
}

/// Decodes a server packet into `pools`. Any error means the packet is
/// corrupt.
pub fn decode_server_packet(
    bytes: &[u8],
    registry: &Registry,
    limits: &Limits,
    pools: &mut Pools,
) -> CodecResult<ServerPacket> {
    let (header, events, deltas) = decode_passes(bytes, registry, limits, |reader, header| {
        unpack_list(reader, delta_budget(limits), |r| {
            Delta::decode(r, header.sender_tick, registry)
        })
    })?;
    Ok(ServerPacket {
        header,
        events: events.into_iter().map(|e| pools.events.insert(e)).collect(),
        deltas: deltas.into_iter().map(|d| pools.deltas.insert(d)).collect(),
    })
}

/// Encodes a client packet.
pub fn encode_client_packet(
    header: &PacketHeader,
    events: &[&Event],
    commands: &[&CommandUpdate],
    view: &[ViewEntry],
    limits: &Limits,
) -> CodecResult<Packed> {
    let (bytes, events, (commands, view)) = encode_passes(header, events, limits, |writer| {
        let commands = pack_list(
            writer,
            command_budget(limits),
            commands,
            |w, update: &&CommandUpdate| update.encode(w, limits),
        )?;
        let view = pack_list(writer, view_budget(limits), view, |w, entry: &ViewEntry| {
            entry.encode(w)
        })?;
        Ok((commands, view))
    })?;
    trace!(bytes = bytes.len(), events, commands, view, "packed client packet");
    Ok(Packed {
        bytes,
        events,
        deltas: 0,
        commands,
        view,
    })
}

/// Decodes a client packet into `pools`. Any error means the packet is
/// corrupt.
pub fn decode_client_packet(
    bytes: &[u8],
    registry: &Registry,
    limits: &Limits,
    pools: &mut Pools,
) -> CodecResult<ClientPacket> {
    let (header, events, (commands, view)) = decode_passes(bytes, registry, limits, |reader, _| {
        let commands = unpack_list(reader, command_budget(limits), |r| {
            CommandUpdate::decode(r, registry, limits)
        })?;
        let view = unpack_list(reader, view_budget(limits), ViewEntry::decode)?;
        Ok((commands, view))
    })?;
    Ok(ClientPacket {
        header,
        events: events.into_iter().map(|e| pools.events.insert(e)).collect(),
        commands: commands.into_iter().map(|c| pools.updates.insert(c)).collect(),
        view,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaOptions;
    use crate::registry::TypeIndex;
    use crate::state::fixtures::{Crate, Note};
    use crate::Command;
    use wire::{EntityId, SequenceId, Tick};

    fn registry() -> Registry {
        Registry::new()
            .with_state::<Crate>()
            .with_event::<Note>()
            .with_command::<crate::state::fixtures::Push>()
    }

    fn header() -> PacketHeader {
        PacketHeader::new(Tick::new(40), Tick::new(38), SequenceId::new(3))
    }

    fn delta(id: u32) -> Delta {
        let state = Crate {
            kind: 1,
            x: 10.0,
            y: 20.0,
            hp: 100,
            boost: 0,
        };
        Delta::build(
            EntityId::new(id),
            Tick::new(40),
            TypeIndex::new(0),
            &state,
            None,
            DeltaOptions {
                include_immutable: true,
                ..DeltaOptions::default()
            },
        )
        .unwrap()
    }

    fn note(seq: u16) -> Event {
        let mut event = Event::new(TypeIndex::new(0), Box::new(Note { code: 1000 }), None);
        event.set_sequence(SequenceId::new(seq));
        event
    }

    #[test]
    fn server_packet_roundtrip() {
        let limits = Limits::default();
        let deltas = [delta(1), delta(2), Delta::frozen(EntityId::new(3), Tick::new(40))];
        let events = [note(4), note(5)];
        let delta_refs: Vec<&Delta> = deltas.iter().collect();
        let event_refs: Vec<&Event> = events.iter().collect();
        let packed = encode_server_packet(&header(), &event_refs, &delta_refs, &limits).unwrap();
        assert_eq!(packed.deltas, 3);
        assert_eq!(packed.events, 2);

        let mut pools = Pools::new();
        let decoded = decode_server_packet(&packed.bytes, &registry(), &limits, &mut pools).unwrap();
        assert_eq!(decoded.header, header());
        assert_eq!(decoded.deltas.len(), 3);
        let deltas: Vec<&Delta> = decoded
            .deltas
            .iter()
            .filter_map(|h| pools.deltas.get(*h))
            .collect();
        assert!(deltas[2].is_frozen());
        assert!(deltas.iter().all(|d| crate::Timed::tick(*d) == Tick::new(40)));
        let seqs: Vec<_> = decoded
            .events
            .iter()
            .filter_map(|h| pools.events.get(*h))
            .map(|e| e.sequence().raw())
            .collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(pools.live(), 5);
        decoded.release(&mut pools);
        assert_eq!(pools.live(), 0);
    }

    #[test]
    fn events_spill_into_fill_pass() {
        let limits = Limits::for_testing();
        let events: Vec<Event> = (1..=80).map(note).collect();
        let refs: Vec<&Event> = events.iter().collect();
        let packed = encode_server_packet(&header(), &refs, &[], &limits).unwrap();
        assert!(packed.bytes.len() <= limits.max_packet_bytes);
        assert!(packed.events > 0 && packed.events < 80);

        let mut pools = Pools::new();
        let decoded = decode_server_packet(&packed.bytes, &registry(), &limits, &mut pools).unwrap();
        assert_eq!(decoded.events.len(), packed.events);
        let seqs: Vec<u16> = decoded
            .events
            .iter()
            .filter_map(|h| pools.events.get(*h))
            .map(|e| e.sequence().raw())
            .collect();
        let expected: Vec<u16> = (1..=u16::try_from(packed.events).unwrap()).collect();
        assert_eq!(seqs, expected);
    }

    #[test]
    fn deltas_stop_at_budget() {
        let limits = Limits::for_testing();
        let deltas: Vec<Delta> = (1..=64).map(delta).collect();
        let refs: Vec<&Delta> = deltas.iter().collect();
        let packed = encode_server_packet(&header(), &[], &refs, &limits).unwrap();
        assert!(packed.deltas < 64);
        assert!(packed.bytes.len() <= limits.max_packet_bytes);
        let decoded =
            decode_server_packet(&packed.bytes, &registry(), &limits, &mut Pools::new()).unwrap();
        assert_eq!(decoded.deltas.len(), packed.deltas);
    }

    #[test]
    fn client_packet_roundtrip() {
        let limits = Limits::default();
        let update = CommandUpdate::new(
            EntityId::new(7),
            vec![Command::new(
                Tick::new(12),
                Box::new(crate::state::fixtures::Push { dx: 1, dy: -1 }),
            )],
        );
        let view = [
            ViewEntry {
                entity: EntityId::new(7),
                tick: Tick::new(30),
                frozen: false,
            },
            ViewEntry {
                entity: EntityId::new(8),
                tick: Tick::new(29),
                frozen: true,
            },
        ];
        let packed =
            encode_client_packet(&header(), &[&note(1)], &[&update], &view, &limits).unwrap();
        assert_eq!((packed.commands, packed.view, packed.events), (1, 2, 1));

        let mut pools = Pools::new();
        let decoded = decode_client_packet(&packed.bytes, &registry(), &limits, &mut pools).unwrap();
        assert_eq!(decoded.commands.len(), 1);
        let update = pools.updates.get(decoded.commands[0]).unwrap();
        assert_eq!(update.entity(), EntityId::new(7));
        assert_eq!(decoded.view, view.to_vec());
        assert_eq!(decoded.events.len(), 1);
        decoded.release(&mut pools);
        assert_eq!(pools.live(), 0);
    }

    #[test]
    fn truncated_packet_is_corrupt() {
        let limits = Limits::default();
        let d = delta(1);
        let packed = encode_server_packet(&header(), &[], &[&d], &limits).unwrap();
        let cut = &packed.bytes[..packed.bytes.len() - 2];
        let mut pools = Pools::new();
        assert!(decode_server_packet(cut, &registry(), &limits, &mut pools).is_err());
        assert_eq!(pools.live(), 0);
    }

    #[test]
    fn trailing_garbage_is_corrupt() {
        let limits = Limits::default();
        let packed = encode_server_packet(&header(), &[], &[], &limits).unwrap();
        let mut bytes = packed.bytes;
        bytes.push(0xFF);
        assert!(decode_server_packet(&bytes, &registry(), &limits, &mut Pools::new()).is_err());
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let limits = Limits::for_testing();
        let bytes = vec![0u8; limits.max_packet_bytes + 1];
        assert!(matches!(
            decode_server_packet(&bytes, &registry(), &limits, &mut Pools::new()),
            Err(crate::CodecError::Wire(DecodeError::PacketTooLarge { .. }))
        ));
    }
}
