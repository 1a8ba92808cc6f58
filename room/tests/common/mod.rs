#![allow(dead_code)]

use std::sync::OnceLock;

use codec::{SyncMessage, SyncState};
use room::{
    ClientNotification, ClientRoom, Entity, Outbox, PeerId, Protocol, RoomConfig,
    ServerNotification, ServerRoom, TickContext,
};
use schema::{FieldCodec, FieldDef, MessageSchema, StateSchema};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mover {
    pub model: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub boost: u8,
}

impl SyncState for Mover {
    fn schema() -> &'static StateSchema<Self> {
        static SCHEMA: OnceLock<StateSchema<Mover>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            StateSchema::builder("mover")
                .immutable(FieldDef::new(
                    "model",
                    FieldCodec::uint(8),
                    |s: &Mover| &s.model,
                    |s: &mut Mover| &mut s.model,
                ))
                .mutable(FieldDef::new(
                    "x",
                    FieldCodec::var_sint(),
                    |s: &Mover| &s.x,
                    |s: &mut Mover| &mut s.x,
                ))
                .mutable(FieldDef::new(
                    "y",
                    FieldCodec::var_sint(),
                    |s: &Mover| &s.y,
                    |s: &mut Mover| &mut s.y,
                ))
                .mutable(FieldDef::new(
                    "z",
                    FieldCodec::var_sint(),
                    |s: &Mover| &s.z,
                    |s: &mut Mover| &mut s.z,
                ))
                .controller(FieldDef::new(
                    "boost",
                    FieldCodec::uint(8),
                    |s: &Mover| &s.boost,
                    |s: &mut Mover| &mut s.boost,
                ))
                .build()
                .unwrap()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    pub dx: i8,
}

impl SyncMessage for Step {
    fn schema() -> &'static MessageSchema<Self> {
        static SCHEMA: OnceLock<MessageSchema<Step>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            MessageSchema::builder("step")
                .field(FieldDef::new(
                    "dx",
                    FieldCodec::sint(8),
                    |s: &Step| &s.dx,
                    |s: &mut Step| &mut s.dx,
                ))
                .build()
                .unwrap()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chat {
    pub code: u32,
}

impl SyncMessage for Chat {
    fn schema() -> &'static MessageSchema<Self> {
        static SCHEMA: OnceLock<MessageSchema<Chat>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            MessageSchema::builder("chat")
                .field(FieldDef::new(
                    "code",
                    FieldCodec::var_uint(),
                    |s: &Chat| &s.code,
                    |s: &mut Chat| &mut s.code,
                ))
                .build()
                .unwrap()
        })
    }
}

/// Moves one unit along x per command and counts every hook.
#[derive(Debug, Default)]
pub struct MoverEntity {
    pub started: u32,
    pub shutdowns: u32,
    pub frozen: u32,
    pub unfrozen: u32,
    pub missing: u32,
    pub saw_next: u32,
    pub control: Vec<bool>,
}

impl Entity for MoverEntity {
    type State = Mover;
    type Command = Step;

    fn apply_command(&mut self, state: &mut Mover, command: &Step, _ctx: &TickContext) {
        state.x += i32::from(command.dx);
    }

    fn command_missing(&mut self, _state: &mut Mover, _ctx: &TickContext) {
        self.missing += 1;
    }

    fn write_command(&mut self, _state: &Mover, command: &mut Step, _ctx: &TickContext) {
        command.dx = 1;
    }

    fn update_proxy(&mut self, _state: &Mover, next: Option<&Mover>, _ctx: &TickContext) {
        if next.is_some() {
            self.saw_next += 1;
        }
    }

    fn on_start(&mut self, _state: &Mover) {
        self.started += 1;
    }

    fn on_shutdown(&mut self) {
        self.shutdowns += 1;
    }

    fn on_frozen(&mut self) {
        self.frozen += 1;
    }

    fn on_unfrozen(&mut self) {
        self.unfrozen += 1;
    }

    fn on_control_changed(&mut self, controlled: bool) {
        self.control.push(controlled);
    }
}

pub fn protocol() -> Protocol {
    Protocol::new().entity::<MoverEntity>().event::<Chat>()
}

/// One server, one client, and a link that can drop either direction.
pub struct Link {
    pub server: ServerRoom,
    pub client: ClientRoom,
    pub peer: PeerId,
    pub drop_to_client: bool,
    pub drop_to_server: bool,
    /// Every server packet, delivered or not.
    pub sent_to_client: Vec<Vec<u8>>,
    to_client: Outbox,
    to_server: Outbox,
}

impl Link {
    pub fn new(config: RoomConfig) -> Self {
        let mut server = ServerRoom::new(protocol(), config.clone()).unwrap();
        let client = ClientRoom::new(protocol(), config).unwrap();
        let peer = PeerId(1);
        assert!(server.add_peer(peer));
        Self {
            server,
            client,
            peer,
            drop_to_client: false,
            drop_to_server: false,
            sent_to_client: Vec::new(),
            to_client: Outbox::new(),
            to_server: Outbox::new(),
        }
    }

    pub fn step(&mut self) {
        self.server.update(&mut self.to_client);
        for (_, bytes) in self.to_client.drain() {
            if !self.drop_to_client {
                self.client.receive(&bytes);
            }
            self.sent_to_client.push(bytes);
        }
        self.client.update(&mut self.to_server);
        for (_, bytes) in self.to_server.drain() {
            if !self.drop_to_server {
                self.server.receive(self.peer, &bytes);
            }
        }
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    pub fn server_notes(&mut self) -> Vec<ServerNotification> {
        self.server.drain_notifications().collect()
    }

    pub fn client_notes(&mut self) -> Vec<ClientNotification> {
        self.client.drain_notifications().collect()
    }
}
