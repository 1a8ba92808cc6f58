//! Entity deltas, history buffers and the packet codec for tickstate.
//!
//! This crate sits between the field schemas and the rooms:
//! - [`SyncState`] / [`SyncMessage`] bind host types to schemas
//! - [`Registry`] assigns wire indices and creates values by index
//! - [`Delta`] builds, applies and (de)serializes entity updates
//! - [`RecordHistory`], [`RollingBuffer`] and [`DejitterBuffer`] hold history
//! - [`Pools`] own every hot-path object behind generation-checked handles
//! - The packet functions pack events, deltas, commands and views into one
//!   budgeted packet
//!
//! # Design Principles
//!
//! - **Corrupt means discard** - Any decode error rejects the whole packet.
//! - **Budgets are not errors** - Lists are packed as prefixes of their input.
//! - **No inheritance** - Type erasure goes through blanket impls of small traits.

mod buffer;
mod command;
mod delta;
mod error;
mod event;
mod history;
mod packet;
mod pool;
mod registry;
mod state;
mod view;

pub use buffer::{DejitterBuffer, RollingBuffer, Timed};
pub use command::{Command, CommandUpdate};
pub use delta::{Delta, DeltaOptions, DeltaPayload};
pub use error::{CodecError, CodecResult, TypeKind};
pub use event::Event;
pub use history::{Record, RecordHistory};
pub use packet::{
    decode_client_packet, decode_server_packet, encode_client_packet, encode_server_packet,
    ClientPacket, Packed, ServerPacket,
};
pub use pool::{Handle, Pool, Pooled, Pools};
pub use registry::{Registry, TypeIndex};
pub use state::{DynMessage, DynState, SyncMessage, SyncState};
pub use view::{View, ViewEntry};

pub use wire::{EntityId, Limits, PacketHeader, SequenceId, Tick};
