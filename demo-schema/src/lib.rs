//! Demo types for the reference simulation: a pawn that walks on a plane,
//! its movement command and a chat event.

use std::sync::OnceLock;

use codec::{DynState, SyncMessage, SyncState};
use room::{Entity, Protocol, TickContext, Vec3};
use schema::{FieldCodec, FieldDef, MessageSchema, StateSchema};

pub const POS_SCALE: u32 = 100;
pub const POS_MIN: i64 = -100_000;
pub const POS_MAX: i64 = 100_000;

/// Distance covered per tick at full input.
pub const SPEED: f32 = 0.25;
pub const MAX_HEALTH: u8 = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pawn {
    pub team: u8,
    pub x: f32,
    pub y: f32,
    pub heading: u16,
    pub health: u8,
    /// Only the controlling client sees this.
    pub stamina: u8,
}

impl Pawn {
    #[must_use]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, 0.0)
    }
}

impl SyncState for Pawn {
    fn schema() -> &'static StateSchema<Self> {
        static SCHEMA: OnceLock<StateSchema<Pawn>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            let position = FieldCodec::fixed_point(POS_MIN, POS_MAX, POS_SCALE);
            let built = StateSchema::builder("pawn")
                .immutable(FieldDef::new(
                    "team",
                    FieldCodec::uint(2),
                    |s: &Pawn| &s.team,
                    |s: &mut Pawn| &mut s.team,
                ))
                .mutable(
                    FieldDef::new("x", position, |s: &Pawn| &s.x, |s: &mut Pawn| &mut s.x)
                        .threshold(1),
                )
                .mutable(
                    FieldDef::new("y", position, |s: &Pawn| &s.y, |s: &mut Pawn| &mut s.y)
                        .threshold(1),
                )
                .mutable(FieldDef::new(
                    "heading",
                    FieldCodec::uint(12),
                    |s: &Pawn| &s.heading,
                    |s: &mut Pawn| &mut s.heading,
                ))
                .mutable(FieldDef::new(
                    "health",
                    FieldCodec::uint(7),
                    |s: &Pawn| &s.health,
                    |s: &mut Pawn| &mut s.health,
                ))
                .controller(FieldDef::new(
                    "stamina",
                    FieldCodec::uint(7),
                    |s: &Pawn| &s.stamina,
                    |s: &mut Pawn| &mut s.stamina,
                ))
                .build();
            match built {
                Ok(schema) => schema,
                Err(err) => panic!("pawn schema: {err}"),
            }
        })
    }
}

/// One tick of movement input. Axes are in `-1..=1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveInput {
    pub dx: i8,
    pub dy: i8,
    pub sprint: bool,
}

impl SyncMessage for MoveInput {
    fn schema() -> &'static MessageSchema<Self> {
        static SCHEMA: OnceLock<MessageSchema<MoveInput>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            let built = MessageSchema::builder("move_input")
                .field(FieldDef::new(
                    "dx",
                    FieldCodec::sint(2),
                    |s: &MoveInput| &s.dx,
                    |s: &mut MoveInput| &mut s.dx,
                ))
                .field(FieldDef::new(
                    "dy",
                    FieldCodec::sint(2),
                    |s: &MoveInput| &s.dy,
                    |s: &mut MoveInput| &mut s.dy,
                ))
                .field(FieldDef::new(
                    "sprint",
                    FieldCodec::bool(),
                    |s: &MoveInput| &s.sprint,
                    |s: &mut MoveInput| &mut s.sprint,
                ))
                .build();
            match built {
                Ok(schema) => schema,
                Err(err) => panic!("move_input schema: {err}"),
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chat {
    pub code: u32,
}

impl SyncMessage for Chat {
    fn schema() -> &'static MessageSchema<Self> {
        static SCHEMA: OnceLock<MessageSchema<Chat>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            let built = MessageSchema::builder("chat")
                .field(FieldDef::new(
                    "code",
                    FieldCodec::var_uint(),
                    |s: &Chat| &s.code,
                    |s: &mut Chat| &mut s.code,
                ))
                .build();
            match built {
                Ok(schema) => schema,
                Err(err) => panic!("chat schema: {err}"),
            }
        })
    }
}

/// Pawn behavior shared by server and clients.
///
/// Hosts set [`PawnEntity::input`] before each client tick; the room turns
/// it into a command.
#[derive(Debug, Default)]
pub struct PawnEntity {
    pub input: MoveInput,
    pub missed_commands: u32,
    /// Midpoint between the presented and next known state, for proxies.
    pub rendered: Option<Vec3>,
    pub controlled: bool,
}

impl Entity for PawnEntity {
    type State = Pawn;
    type Command = MoveInput;

    fn update_authoritative(&mut self, state: &mut Pawn, _ctx: &TickContext) {
        if state.stamina < MAX_HEALTH {
            state.stamina += 1;
        }
    }

    fn apply_command(&mut self, state: &mut Pawn, command: &MoveInput, _ctx: &TickContext) {
        step(state, *command);
    }

    fn command_missing(&mut self, _state: &mut Pawn, _ctx: &TickContext) {
        self.missed_commands += 1;
    }

    fn write_command(&mut self, _state: &Pawn, command: &mut MoveInput, _ctx: &TickContext) {
        *command = self.input;
    }

    fn update_proxy(&mut self, state: &Pawn, next: Option<&Pawn>, _ctx: &TickContext) {
        let here = state.position();
        self.rendered = Some(next.map_or(here, |next| {
            let there = next.position();
            Vec3::new((here.x + there.x) / 2.0, (here.y + there.y) / 2.0, 0.0)
        }));
    }

    fn on_control_changed(&mut self, controlled: bool) {
        self.controlled = controlled;
    }
}

/// Moves `state` by one tick of `input`. Sprinting costs stamina.
pub fn step(state: &mut Pawn, input: MoveInput) {
    let mut speed = SPEED;
    if input.sprint && state.stamina >= 2 {
        state.stamina -= 2;
        speed *= 2.0;
    }
    state.x += f32::from(input.dx.signum()) * speed;
    state.y += f32::from(input.dy.signum()) * speed;
    if input.dx != 0 || input.dy != 0 {
        state.heading = heading(input);
    }
}

fn heading(input: MoveInput) -> u16 {
    // Eight directions spread over the 12-bit circle.
    let octant: u16 = match (input.dx.signum(), input.dy.signum()) {
        (1, 0) => 0,
        (1, 1) => 1,
        (0, 1) => 2,
        (-1, 1) => 3,
        (-1, 0) => 4,
        (-1, -1) => 5,
        (0, -1) => 6,
        _ => 7,
    };
    octant * 512
}

/// Position of a pawn state, for [`room::SpatialScope`].
pub fn pawn_position(state: &dyn DynState) -> Option<Vec3> {
    state.as_any().downcast_ref::<Pawn>().map(Pawn::position)
}

/// The protocol every demo server and client registers.
#[must_use]
pub fn demo_protocol() -> Protocol {
    Protocol::new().entity::<PawnEntity>().event::<Chat>()
}
