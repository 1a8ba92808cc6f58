//! Field bindings and schemas for tickstate entity state, commands and events.
//!
//! This crate defines how a Rust type is represented on the wire:
//! - Field codecs (bool, integers, varints, fixed-point, raw floats)
//! - Quantization and per-field change thresholds
//! - Typed accessor bindings ([`FieldDef`]) grouped into [`StateSchema`]s
//!   (immutable / mutable / controller) and [`MessageSchema`]s
//! - Deterministic schema hashing
//!
//! # Design Principles
//!
//! - **Explicit registration** - Fields are bound with accessor pairs; no reflection.
//! - **Quantized comparison** - Change detection happens at wire resolution.
//! - **Deterministic hashing** - The fingerprint is stable given the same definition.

mod error;
mod field;
mod hash;
mod mask;
mod schema;

pub use error::{SchemaError, SchemaResult};
pub use field::{ChangePolicy, FieldCodec, FieldValue, FixedPoint, Scalar, ValueKind};
pub use hash::SchemaHasher;
pub use mask::FieldMask;
pub use schema::{FieldDef, MessageSchema, MessageSchemaBuilder, StateSchema, StateSchemaBuilder};
