//! Wire primitives for the tickstate protocol.
//!
//! This crate owns the identifier types that appear on the wire ([`Tick`],
//! [`EntityId`], [`SequenceId`]), the packet header, the protocol byte
//! budgets, and the budgeted list packing every packet section uses. It does
//! not know about entity state types; that lives in `codec`.
//!
//! # Design Principles
//!
//! - **Bit-exact layout** - Packets are bit-packed; the layout is fixed.
//! - **Bounded decoding** - Every list is validated against [`Limits`] before and during iteration.
//! - **Partial lists are normal** - Packing stops at the budget; it is not an error.

mod error;
mod header;
mod limits;
mod list;
mod types;

pub use error::{DecodeError, EncodeError, WireResult};
pub use header::PacketHeader;
pub use limits::{Limits, EVENT_TRAILER_BYTES, MAX_LIST_ITEMS};
pub use list::{pack_list, unpack_list, ListBudget};
pub use types::{EntityId, SequenceId, Tick};
