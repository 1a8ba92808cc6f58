//! Typed field bindings and per-type schemas.
//!
//! A schema is an ordered list of [`FieldDef`]s, each binding one Rust field
//! of `S` to a wire codec. State schemas split their fields into the three
//! sync categories: immutable, mutable and controller.

use std::collections::HashSet;
use std::fmt;

use bitstream::{BitReader, BitWriter};

use crate::error::{SchemaError, SchemaResult};
use crate::field::{ChangePolicy, FieldCodec, FieldValue, FixedPoint, Scalar, ValueKind};
use crate::hash::SchemaHasher;
use crate::mask::FieldMask;

type ReadFn<S> = Box<dyn Fn(&S) -> FieldValue + Send + Sync>;
type WriteFn<S> = Box<dyn Fn(&mut S, FieldValue) -> bool + Send + Sync>;
type CopyFn<S> = Box<dyn Fn(&mut S, &S) + Send + Sync>;
type ResetFn<S> = Box<dyn Fn(&mut S) + Send + Sync>;

/// Binding of one field of `S` to a codec.
///
/// Exposes the four capabilities the sync engine needs: read into a buffer,
/// write from a buffer, compare, and reset to the initial value.
pub struct FieldDef<S> {
    name: &'static str,
    codec: FieldCodec,
    change: ChangePolicy,
    kind: ValueKind,
    read: ReadFn<S>,
    write: WriteFn<S>,
    copy: CopyFn<S>,
    reset: ResetFn<S>,
}

impl<S: Default + 'static> FieldDef<S> {
    /// Binds a field through a pair of accessors.
    ///
    /// ```
    /// use schema::{FieldCodec, FieldDef};
    ///
    /// #[derive(Default)]
    /// struct Door {
    ///     open: bool,
    /// }
    ///
    /// let field = FieldDef::new(
    ///     "open",
    ///     FieldCodec::bool(),
    ///     |s: &Door| &s.open,
    ///     |s: &mut Door| &mut s.open,
    /// );
    /// assert_eq!(field.name(), "open");
    /// ```
    pub fn new<T, G, M>(name: &'static str, codec: FieldCodec, get: G, get_mut: M) -> Self
    where
        T: Scalar,
        G: Fn(&S) -> &T + Copy + Send + Sync + 'static,
        M: Fn(&mut S) -> &mut T + Copy + Send + Sync + 'static,
    {
        let initial = *get(&S::default());
        Self {
            name,
            codec,
            change: ChangePolicy::Always,
            kind: T::KIND,
            read: Box::new(move |s: &S| get(s).to_value()),
            write: Box::new(move |s: &mut S, value: FieldValue| match T::from_value(value) {
                Some(v) => {
                    *get_mut(s) = v;
                    true
                }
                None => false,
            }),
            copy: Box::new(move |dst: &mut S, src: &S| *get_mut(dst) = *get(src)),
            reset: Box::new(move |dst: &mut S| *get_mut(dst) = initial),
        }
    }
}

impl<S> FieldDef<S> {
    /// Only report a change when the quantized difference exceeds
    /// `threshold_q`.
    #[must_use]
    pub fn threshold(mut self, threshold_q: u32) -> Self {
        self.change = ChangePolicy::Threshold { threshold_q };
        self
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn codec(&self) -> FieldCodec {
        self.codec
    }

    #[must_use]
    pub const fn change_policy(&self) -> ChangePolicy {
        self.change
    }

    /// Reads the current value out of `state`.
    pub fn get(&self, state: &S) -> FieldValue {
        (self.read)(state)
    }

    /// Stores `value` into `state`.
    pub fn set(&self, state: &mut S, value: FieldValue) -> SchemaResult<()> {
        if (self.write)(state, value) {
            Ok(())
        } else {
            Err(SchemaError::Unrepresentable { field: self.name })
        }
    }

    /// Copies this field from `src` into `dst` without quantization.
    pub fn copy(&self, dst: &mut S, src: &S) {
        (self.copy)(dst, src);
    }

    /// Restores this field to the value it has in `S::default()`.
    pub fn reset(&self, state: &mut S) {
        (self.reset)(state);
    }

    /// Returns `true` if the field differs between the two states under its
    /// change policy.
    pub fn changed(&self, basis: &S, current: &S) -> bool {
        self.codec
            .changed(self.change, self.get(basis), self.get(current))
    }

    pub fn encode(&self, state: &S, writer: &mut BitWriter) -> SchemaResult<()> {
        self.codec.write(self.get(state), writer)
    }

    pub fn decode(&self, state: &mut S, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        let value = self.codec.read(reader)?;
        self.set(state, value)
    }

    fn validate(&self) -> SchemaResult<()> {
        match self.codec {
            FieldCodec::UInt { bits } | FieldCodec::SInt { bits } => {
                if bits == 0 || bits > 64 {
                    return Err(SchemaError::InvalidBitWidth {
                        field: self.name,
                        bits,
                    });
                }
            }
            FieldCodec::FixedPoint(fp) => validate_fixed_point(self.name, fp)?,
            FieldCodec::Float => {
                if matches!(self.change, ChangePolicy::Threshold { .. }) {
                    return Err(SchemaError::ThresholdOnRawFloat { field: self.name });
                }
            }
            FieldCodec::Bool | FieldCodec::VarUInt | FieldCodec::VarSInt => {}
        }
        if self.codec.value_kind() != self.kind {
            return Err(SchemaError::CodecMismatch {
                field: self.name,
                codec: self.codec,
                kind: self.kind,
            });
        }
        Ok(())
    }

    fn hash_into(&self, hasher: &mut SchemaHasher) {
        hasher.write_str(self.name);
        hasher.write_codec(self.codec);
        hasher.write_change_policy(self.change);
    }
}

impl<S> fmt::Debug for FieldDef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("codec", &self.codec)
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

fn validate_fixed_point(field: &'static str, fp: FixedPoint) -> SchemaResult<()> {
    if fp.scale == 0 {
        return Err(SchemaError::InvalidFixedPointScale { field });
    }
    if fp.min_q > fp.max_q {
        return Err(SchemaError::InvalidFixedPointRange {
            field,
            min_q: fp.min_q,
            max_q: fp.max_q,
        });
    }
    Ok(())
}

fn check_unique_names<'a, S: 'a>(
    schema: &'static str,
    fields: impl IntoIterator<Item = &'a FieldDef<S>>,
) -> SchemaResult<()> {
    let mut names = HashSet::new();
    for field in fields {
        if !names.insert(field.name) {
            return Err(SchemaError::DuplicateFieldName {
                schema,
                name: field.name,
            });
        }
        field.validate()?;
    }
    Ok(())
}

/// Field layout of an entity state type.
#[derive(Debug)]
pub struct StateSchema<S> {
    name: &'static str,
    immutable: Vec<FieldDef<S>>,
    mutable: Vec<FieldDef<S>>,
    controller: Vec<FieldDef<S>>,
}

impl<S> StateSchema<S> {
    #[must_use]
    pub fn builder(name: &'static str) -> StateSchemaBuilder<S> {
        StateSchemaBuilder {
            schema: Self {
                name,
                immutable: Vec::new(),
                mutable: Vec::new(),
                controller: Vec::new(),
            },
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn immutable_fields(&self) -> &[FieldDef<S>] {
        &self.immutable
    }

    #[must_use]
    pub fn mutable_fields(&self) -> &[FieldDef<S>] {
        &self.mutable
    }

    #[must_use]
    pub fn controller_fields(&self) -> &[FieldDef<S>] {
        &self.controller
    }

    /// Mask with a bit for every mutable field.
    #[must_use]
    pub fn full_mask(&self) -> FieldMask {
        FieldMask::full(self.mutable.len())
    }

    /// Mask of mutable fields that differ between `basis` and `current`.
    pub fn compare_mutable(&self, basis: &S, current: &S) -> FieldMask {
        let mut mask = FieldMask::EMPTY;
        for (index, field) in self.mutable.iter().enumerate() {
            if field.changed(basis, current) {
                mask.set(index);
            }
        }
        mask
    }

    /// Returns `true` if any controller field differs.
    pub fn controller_differs(&self, basis: &S, current: &S) -> bool {
        self.controller.iter().any(|f| f.changed(basis, current))
    }

    /// Copies the mutable fields selected by `mask` from `src`.
    pub fn apply_mutable(&self, dst: &mut S, src: &S, mask: FieldMask) {
        for index in mask.iter() {
            if let Some(field) = self.mutable.get(index) {
                field.copy(dst, src);
            }
        }
    }

    pub fn apply_immutable(&self, dst: &mut S, src: &S) {
        for field in &self.immutable {
            field.copy(dst, src);
        }
    }

    pub fn apply_controller(&self, dst: &mut S, src: &S) {
        for field in &self.controller {
            field.copy(dst, src);
        }
    }

    pub fn reset_controller(&self, state: &mut S) {
        for field in &self.controller {
            field.reset(state);
        }
    }

    /// Resets every field of every category.
    pub fn reset(&self, state: &mut S) {
        for field in self.immutable.iter().chain(&self.mutable).chain(&self.controller) {
            field.reset(state);
        }
    }

    pub fn encode_immutable(&self, state: &S, writer: &mut BitWriter) -> SchemaResult<()> {
        encode_all(&self.immutable, state, writer)
    }

    pub fn decode_immutable(&self, state: &mut S, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        decode_all(&self.immutable, state, reader)
    }

    pub fn encode_controller(&self, state: &S, writer: &mut BitWriter) -> SchemaResult<()> {
        encode_all(&self.controller, state, writer)
    }

    pub fn decode_controller(&self, state: &mut S, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        decode_all(&self.controller, state, reader)
    }

    /// Writes the mask (one bit per mutable field) followed by the selected
    /// field values.
    pub fn encode_mutable(
        &self,
        state: &S,
        mask: FieldMask,
        writer: &mut BitWriter,
    ) -> SchemaResult<()> {
        for index in 0..self.mutable.len() {
            writer.write_bool(mask.contains(index));
        }
        for index in mask.iter() {
            if let Some(field) = self.mutable.get(index) {
                field.encode(state, writer)?;
            }
        }
        Ok(())
    }

    /// Reads what [`encode_mutable`](Self::encode_mutable) wrote into `state`
    /// and returns the mask.
    pub fn decode_mutable(
        &self,
        state: &mut S,
        reader: &mut BitReader<'_>,
    ) -> SchemaResult<FieldMask> {
        let mut mask = FieldMask::EMPTY;
        for index in 0..self.mutable.len() {
            if reader.read_bool()? {
                mask.set(index);
            }
        }
        for index in mask.iter() {
            self.mutable[index].decode(state, reader)?;
        }
        Ok(mask)
    }

    pub fn hash_into(&self, hasher: &mut SchemaHasher) {
        hasher.write_str(self.name);
        for (tag, fields) in [(0u8, &self.immutable), (1, &self.mutable), (2, &self.controller)] {
            hasher.write_u8(tag);
            hasher.write_len(fields.len());
            for field in fields {
                field.hash_into(hasher);
            }
        }
    }
}

/// Builder for [`StateSchema`].
#[derive(Debug)]
pub struct StateSchemaBuilder<S> {
    schema: StateSchema<S>,
}

impl<S> StateSchemaBuilder<S> {
    /// Adds a field sent once, when the entity first reaches a peer.
    #[must_use]
    pub fn immutable(mut self, field: FieldDef<S>) -> Self {
        self.schema.immutable.push(field);
        self
    }

    /// Adds a field sent whenever it changes.
    #[must_use]
    pub fn mutable(mut self, field: FieldDef<S>) -> Self {
        self.schema.mutable.push(field);
        self
    }

    /// Adds a field sent in full to the controlling peer only.
    #[must_use]
    pub fn controller(mut self, field: FieldDef<S>) -> Self {
        self.schema.controller.push(field);
        self
    }

    /// Builds the schema after validation.
    pub fn build(self) -> SchemaResult<StateSchema<S>> {
        let schema = self.schema;
        if schema.mutable.len() > FieldMask::MAX_FIELDS {
            return Err(SchemaError::TooManyMutableFields {
                schema: schema.name,
                count: schema.mutable.len(),
                max: FieldMask::MAX_FIELDS,
            });
        }
        check_unique_names(
            schema.name,
            schema
                .immutable
                .iter()
                .chain(&schema.mutable)
                .chain(&schema.controller),
        )?;
        Ok(schema)
    }
}

/// Field layout of a command or event type. All fields are sent every time.
#[derive(Debug)]
pub struct MessageSchema<S> {
    name: &'static str,
    fields: Vec<FieldDef<S>>,
}

impl<S> MessageSchema<S> {
    #[must_use]
    pub fn builder(name: &'static str) -> MessageSchemaBuilder<S> {
        MessageSchemaBuilder {
            schema: Self {
                name,
                fields: Vec::new(),
            },
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef<S>] {
        &self.fields
    }

    pub fn encode(&self, message: &S, writer: &mut BitWriter) -> SchemaResult<()> {
        encode_all(&self.fields, message, writer)
    }

    pub fn decode(&self, message: &mut S, reader: &mut BitReader<'_>) -> SchemaResult<()> {
        decode_all(&self.fields, message, reader)
    }

    pub fn reset(&self, message: &mut S) {
        for field in &self.fields {
            field.reset(message);
        }
    }

    pub fn hash_into(&self, hasher: &mut SchemaHasher) {
        hasher.write_str(self.name);
        hasher.write_len(self.fields.len());
        for field in &self.fields {
            field.hash_into(hasher);
        }
    }
}

/// Builder for [`MessageSchema`].
#[derive(Debug)]
pub struct MessageSchemaBuilder<S> {
    schema: MessageSchema<S>,
}

impl<S> MessageSchemaBuilder<S> {
    #[must_use]
    pub fn field(mut self, field: FieldDef<S>) -> Self {
        self.schema.fields.push(field);
        self
    }

    pub fn build(self) -> SchemaResult<MessageSchema<S>> {
        check_unique_names(self.schema.name, &self.schema.fields)?;
        Ok(self.schema)
    }
}

fn encode_all<S>(fields: &[FieldDef<S>], state: &S, writer: &mut BitWriter) -> SchemaResult<()> {
    for field in fields {
        field.encode(state, writer)?;
    }
    Ok(())
}

fn decode_all<S>(
    fields: &[FieldDef<S>],
    state: &mut S,
    reader: &mut BitReader<'_>,
) -> SchemaResult<()> {
    for field in fields {
        field.decode(state, reader)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Crate {
        kind: u8,
        x: f32,
        y: f32,
        hp: i16,
        carried_by: u32,
    }

    impl Default for Crate {
        fn default() -> Self {
            Self {
                kind: 0,
                x: 0.0,
                y: 0.0,
                hp: 100,
                carried_by: 0,
            }
        }
    }

    fn schema() -> StateSchema<Crate> {
        StateSchema::builder("crate")
            .immutable(FieldDef::new(
                "kind",
                FieldCodec::uint(4),
                |s: &Crate| &s.kind,
                |s: &mut Crate| &mut s.kind,
            ))
            .mutable(FieldDef::new(
                "x",
                FieldCodec::fixed_point(-10_000, 10_000, 10),
                |s: &Crate| &s.x,
                |s: &mut Crate| &mut s.x,
            ))
            .mutable(
                FieldDef::new(
                    "y",
                    FieldCodec::fixed_point(-10_000, 10_000, 10),
                    |s: &Crate| &s.y,
                    |s: &mut Crate| &mut s.y,
                )
                .threshold(2),
            )
            .mutable(FieldDef::new(
                "hp",
                FieldCodec::sint(10),
                |s: &Crate| &s.hp,
                |s: &mut Crate| &mut s.hp,
            ))
            .controller(FieldDef::new(
                "carried_by",
                FieldCodec::var_uint(),
                |s: &Crate| &s.carried_by,
                |s: &mut Crate| &mut s.carried_by,
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn compare_mutable_flags_changed_fields() {
        let schema = schema();
        let a = Crate::default();
        let mut b = a.clone();
        b.x = 3.0;
        b.hp = 40;
        let mask = schema.compare_mutable(&a, &b);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn threshold_suppresses_small_changes() {
        let schema = schema();
        let a = Crate::default();
        let mut b = a.clone();
        b.y = 0.2;
        assert!(schema.compare_mutable(&a, &b).is_empty());
        b.y = 0.3;
        assert_eq!(schema.compare_mutable(&a, &b).raw(), 0b010);
    }

    #[test]
    fn apply_mutable_only_copies_masked() {
        let schema = schema();
        let src = Crate {
            x: 1.0,
            y: 2.0,
            hp: 3,
            ..Crate::default()
        };
        let mut dst = Crate::default();
        schema.apply_mutable(&mut dst, &src, FieldMask::from_raw(0b100));
        assert_eq!(dst.hp, 3);
        assert_eq!(dst.x, 0.0);
        assert_eq!(dst.y, 0.0);
    }

    #[test]
    fn reset_restores_defaults() {
        let schema = schema();
        let mut state = Crate {
            kind: 3,
            hp: -5,
            carried_by: 9,
            ..Crate::default()
        };
        schema.reset_controller(&mut state);
        assert_eq!(state.carried_by, 0);
        assert_eq!(state.hp, -5);
        schema.reset(&mut state);
        assert_eq!(state, Crate::default());
    }

    #[test]
    fn encode_decode_categories() {
        let schema = schema();
        let state = Crate {
            kind: 7,
            x: -12.5,
            y: 4.0,
            hp: -200,
            carried_by: 12_345,
        };
        let mut writer = BitWriter::new();
        schema.encode_immutable(&state, &mut writer).unwrap();
        schema
            .encode_mutable(&state, FieldMask::from_raw(0b101), &mut writer)
            .unwrap();
        schema.encode_controller(&state, &mut writer).unwrap();
        let bytes = writer.finish();

        let mut out = Crate::default();
        let mut reader = BitReader::new(&bytes);
        schema.decode_immutable(&mut out, &mut reader).unwrap();
        let mask = schema.decode_mutable(&mut out, &mut reader).unwrap();
        schema.decode_controller(&mut out, &mut reader).unwrap();
        assert!(reader.finish().is_ok());

        assert_eq!(mask.raw(), 0b101);
        assert_eq!(out.kind, 7);
        assert_eq!(out.x, -12.5);
        assert_eq!(out.y, 0.0);
        assert_eq!(out.hp, -200);
        assert_eq!(out.carried_by, 12_345);
    }

    #[test]
    fn decoded_value_must_fit_bound_type() {
        #[derive(Default)]
        struct Tiny {
            v: u8,
        }
        let field = FieldDef::new(
            "v",
            FieldCodec::uint(8),
            |s: &Tiny| &s.v,
            |s: &mut Tiny| &mut s.v,
        );
        let mut tiny = Tiny::default();
        assert!(field.set(&mut tiny, FieldValue::UInt(255)).is_ok());
        assert!(matches!(
            field.set(&mut tiny, FieldValue::UInt(256)),
            Err(SchemaError::Unrepresentable { field: "v" })
        ));
    }

    #[test]
    fn rejects_duplicate_names_across_categories() {
        let err = StateSchema::builder("crate")
            .immutable(FieldDef::new(
                "x",
                FieldCodec::uint(4),
                |s: &Crate| &s.kind,
                |s: &mut Crate| &mut s.kind,
            ))
            .mutable(FieldDef::new(
                "x",
                FieldCodec::float(),
                |s: &Crate| &s.x,
                |s: &mut Crate| &mut s.x,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateFieldName { name: "x", .. }));
    }

    #[test]
    fn rejects_codec_type_mismatch() {
        let err = MessageSchema::builder("msg")
            .field(FieldDef::new(
                "hp",
                FieldCodec::uint(8),
                |s: &Crate| &s.hp,
                |s: &mut Crate| &mut s.hp,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::CodecMismatch { field: "hp", .. }));
    }

    #[test]
    fn rejects_invalid_codecs() {
        let zero_bits = MessageSchema::builder("msg")
            .field(FieldDef::new(
                "kind",
                FieldCodec::uint(0),
                |s: &Crate| &s.kind,
                |s: &mut Crate| &mut s.kind,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(zero_bits, SchemaError::InvalidBitWidth { .. }));

        let bad_scale = MessageSchema::builder("msg")
            .field(FieldDef::new(
                "x",
                FieldCodec::fixed_point(-1, 1, 0),
                |s: &Crate| &s.x,
                |s: &mut Crate| &mut s.x,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(bad_scale, SchemaError::InvalidFixedPointScale { .. }));

        let raw_threshold = MessageSchema::builder("msg")
            .field(
                FieldDef::new(
                    "x",
                    FieldCodec::float(),
                    |s: &Crate| &s.x,
                    |s: &mut Crate| &mut s.x,
                )
                .threshold(1),
            )
            .build()
            .unwrap_err();
        assert!(matches!(raw_threshold, SchemaError::ThresholdOnRawFloat { .. }));
    }
}
