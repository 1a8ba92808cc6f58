//! Synchronized state and message traits.
//!
//! [`SyncState`] and [`SyncMessage`] are implemented by host types and tie
//! them to a static schema. The engine stores values behind the object-safe
//! [`DynState`] / [`DynMessage`] forms, which every `SyncState` /
//! `SyncMessage` gets through a blanket impl.

use std::any::Any;
use std::fmt;

use bitstream::{BitReader, BitWriter};
use schema::{FieldMask, MessageSchema, SchemaResult, StateSchema};

/// Per-entity synchronized data.
///
/// ```
/// use std::sync::OnceLock;
///
/// use codec::SyncState;
/// use schema::{FieldCodec, FieldDef, StateSchema};
///
/// #[derive(Debug, Clone, Default)]
/// struct Door {
///     open: bool,
/// }
///
/// impl SyncState for Door {
///     fn schema() -> &'static StateSchema<Self> {
///         static SCHEMA: OnceLock<StateSchema<Door>> = OnceLock::new();
///         SCHEMA.get_or_init(|| {
///             StateSchema::builder("door")
///                 .mutable(FieldDef::new(
///                     "open",
///                     FieldCodec::bool(),
///                     |s: &Door| &s.open,
///                     |s: &mut Door| &mut s.open,
///                 ))
///                 .build()
///                 .unwrap()
///         })
///     }
/// }
///
/// assert_eq!(Door::schema().name(), "door");
/// ```
pub trait SyncState: Clone + Default + fmt::Debug + Send + Sync + 'static {
    fn schema() -> &'static StateSchema<Self>;
}

/// A command or event payload. Every field is sent every time.
pub trait SyncMessage: Clone + Default + fmt::Debug + Send + Sync + 'static {
    fn schema() -> &'static MessageSchema<Self>;
}

/// Object-safe form of [`SyncState`].
///
/// Methods taking a second state panic if it is a different concrete type;
/// a state never straddles two types.
pub trait DynState: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// The schema name of the concrete type.
    fn type_name(&self) -> &'static str;
    fn clone_state(&self) -> Box<dyn DynState>;
    /// Overwrites every category with `source`.
    fn copy_from(&mut self, source: &dyn DynState);
    fn reset(&mut self);
    fn full_mask(&self) -> FieldMask;
    /// Mutable fields of `self` that differ from `basis`.
    fn compare_mutable(&self, basis: &dyn DynState) -> FieldMask;
    fn controller_differs(&self, basis: &dyn DynState) -> bool;
    fn apply_mutable_from(&mut self, source: &dyn DynState, mask: FieldMask);
    fn apply_immutable_from(&mut self, source: &dyn DynState);
    fn apply_controller_from(&mut self, source: &dyn DynState);
    fn reset_controller(&mut self);
    fn encode_immutable(&self, writer: &mut BitWriter) -> SchemaResult<()>;
    fn decode_immutable(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<()>;
    fn encode_mutable(&self, mask: FieldMask, writer: &mut BitWriter) -> SchemaResult<()>;
    fn decode_mutable(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<FieldMask>;
    fn encode_controller(&self, writer: &mut BitWriter) -> SchemaResult<()>;
    fn decode_controller(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<()>;
}

fn same_type<'a, S: 'static>(other: &'a dyn Any, name: &'static str) -> &'a S {
    match other.downcast_ref::<S>() {
        Some(state) => state,
        None => panic!("`{name}` combined with a value of another type"),
    }
}

impl<S: SyncState> DynState for S {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        S::schema().name()
    }

    fn clone_state(&self) -> Box<dyn DynState> {
        Box::new(self.clone())
    }

    fn copy_from(&mut self, source: &dyn DynState) {
        self.clone_from(same_type::<S>(source.as_any(), self.type_name()));
    }

    fn reset(&mut self) {
        S::schema().reset(self);
    }

    fn full_mask(&self) -> FieldMask {
        S::schema().full_mask()
    }

    fn compare_mutable(&self, basis: &dyn DynState) -> FieldMask {
        let basis = same_type::<S>(basis.as_any(), self.type_name());
        S::schema().compare_mutable(basis, self)
    }

    fn controller_differs(&self, basis: &dyn DynState) -> bool {
        let basis = same_type::<S>(basis.as_any(), self.type_name());
        S::schema().controller_differs(basis, self)
    }

    fn apply_mutable_from(&mut self, source: &dyn DynState, mask: FieldMask) {
        let source = same_type::<S>(source.as_any(), self.type_name());
        S::schema().apply_mutable(self, source, mask);
    }

    fn apply_immutable_from(&mut self, source: &dyn DynState) {
        let source = same_type::<S>(source.as_any(), self.type_name());
        S::schema().apply_immutable(self, source);
    }

    fn apply_controller_from(&mut self, source: &dyn DynState) {
        let source = same_type::<S>(source.as_any(), self.type_name());
        S::schema().apply_controller(self, source);
    }

    fn reset_controller(&mut self) {
        S::schema().reset_controller(self);
    }

    fn encode_immutable(&self, writer: &mut BitWriter) -> SchemaResult<()> {
        S::schema().encode_immutable(self, writer)
    }

    fn decode_immutable(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        S::schema().decode_immutable(self, reader)
    }

    fn encode_mutable(&self, mask: FieldMask, writer: &mut BitWriter) -> SchemaResult<()> {
        S::schema().encode_mutable(self, mask, writer)
    }

    fn decode_mutable(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<FieldMask> {
        S::schema().decode_mutable(self, reader)
    }

    fn encode_controller(&self, writer: &mut BitWriter) -> SchemaResult<()> {
        S::schema().encode_controller(self, writer)
    }

    fn decode_controller(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        S::schema().decode_controller(self, reader)
    }
}

impl dyn DynState {
    pub fn downcast_ref<S: SyncState>(&self) -> Option<&S> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<S: SyncState>(&mut self) -> Option<&mut S> {
        self.as_any_mut().downcast_mut()
    }

    pub fn is<S: SyncState>(&self) -> bool {
        self.as_any().is::<S>()
    }
}

impl Clone for Box<dyn DynState> {
    fn clone(&self) -> Self {
        self.clone_state()
    }
}

/// Object-safe form of [`SyncMessage`].
pub trait DynMessage: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
    fn clone_message(&self) -> Box<dyn DynMessage>;
    fn reset(&mut self);
    fn encode(&self, writer: &mut BitWriter) -> SchemaResult<()>;
    fn decode(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<()>;
}

impl<M: SyncMessage> DynMessage for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        M::schema().name()
    }

    fn clone_message(&self) -> Box<dyn DynMessage> {
        Box::new(self.clone())
    }

    fn reset(&mut self) {
        M::schema().reset(self);
    }

    fn encode(&self, writer: &mut BitWriter) -> SchemaResult<()> {
        M::schema().encode(self, writer)
    }

    fn decode(&mut self, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        M::schema().decode(self, reader)
    }
}

impl dyn DynMessage {
    pub fn downcast_ref<M: SyncMessage>(&self) -> Option<&M> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<M: SyncMessage>(&mut self) -> Option<&mut M> {
        self.as_any_mut().downcast_mut()
    }

    pub fn is<M: SyncMessage>(&self) -> bool {
        self.as_any().is::<M>()
    }
}

impl Clone for Box<dyn DynMessage> {
    fn clone(&self) -> Self {
        self.clone_message()
    }
}
