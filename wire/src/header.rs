//! Packet header.

use bitstream::{BitReader, BitWriter};

use crate::error::{EncodeError, WireResult};
use crate::types::{SequenceId, Tick};

/// The fixed leading section of every packet.
///
/// Layout: `[sender_tick varint][ack_tick varint][ack_event 16 bits]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Tick of the sender when the packet was produced. Always valid.
    pub sender_tick: Tick,
    /// Latest remote tick the sender has received, or invalid if none.
    pub ack_tick: Tick,
    /// Latest remote event sequence the sender has received.
    pub ack_event: SequenceId,
}

impl PacketHeader {
    #[must_use]
    pub const fn new(sender_tick: Tick, ack_tick: Tick, ack_event: SequenceId) -> Self {
        Self {
            sender_tick,
            ack_tick,
            ack_event,
        }
    }

    pub fn encode(&self, writer: &mut BitWriter) -> Result<(), EncodeError> {
        debug_assert!(self.sender_tick.is_valid(), "sending with invalid tick");
        self.sender_tick.encode(writer)?;
        self.ack_tick.encode(writer)?;
        self.ack_event.encode(writer)?;
        Ok(())
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Fails on truncation or when the sender tick is the invalid sentinel.
    pub fn decode(reader: &mut BitReader<'_>) -> WireResult<Self> {
        let sender_tick = Tick::decode_valid(reader, "sender_tick")?;
        let ack_tick = Tick::decode(reader)?;
        let ack_event = SequenceId::decode(reader)?;
        Ok(Self {
            sender_tick,
            ack_tick,
            ack_event,
        })
    }
}
