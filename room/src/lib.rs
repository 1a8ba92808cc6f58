//! Server and client rooms for tickstate.
//!
//! A room is the tick-driven owner of everything one side of a session
//! needs: entity behaviors and their states, a [`Clock`] per remote side,
//! a reliable [`EventChannel`] per peer, and the packet codec configuration.
//! Rooms never touch sockets. Hosts pass inbound bytes to `receive` and get
//! outbound bytes through a [`Transport`] during `update`.
//!
//! # Example
//!
//! ```
//! use std::sync::OnceLock;
//!
//! use codec::{SyncState, Tick};
//! use room::{ClientRoom, Entity, NoCommand, Outbox, PeerId, Protocol, RoomConfig, ServerRoom};
//! use schema::{FieldCodec, FieldDef, StateSchema};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Lamp {
//!     lit: bool,
//! }
//!
//! impl SyncState for Lamp {
//!     fn schema() -> &'static StateSchema<Self> {
//!         static SCHEMA: OnceLock<StateSchema<Lamp>> = OnceLock::new();
//!         SCHEMA.get_or_init(|| {
//!             StateSchema::builder("lamp")
//!                 .mutable(FieldDef::new(
//!                     "lit",
//!                     FieldCodec::bool(),
//!                     |s: &Lamp| &s.lit,
//!                     |s: &mut Lamp| &mut s.lit,
//!                 ))
//!                 .build()
//!                 .unwrap()
//!         })
//!     }
//! }
//!
//! #[derive(Default)]
//! struct LampEntity;
//!
//! impl Entity for LampEntity {
//!     type State = Lamp;
//!     type Command = NoCommand;
//! }
//!
//! let protocol = Protocol::new().entity::<LampEntity>();
//! let mut server = ServerRoom::new(protocol.clone(), RoomConfig::for_testing()).unwrap();
//! let mut client = ClientRoom::new(protocol, RoomConfig::for_testing()).unwrap();
//! let peer = PeerId(1);
//! server.add_peer(peer);
//! let lamp = server.add_entity(LampEntity, Lamp { lit: true }).unwrap();
//!
//! let mut to_client = Outbox::new();
//! let mut to_server = Outbox::new();
//! for _ in 0..10 {
//!     server.update(&mut to_client);
//!     for (_, bytes) in to_client.drain() {
//!         client.receive(&bytes);
//!     }
//!     client.update(&mut to_server);
//!     for (_, bytes) in to_server.drain() {
//!         server.receive(peer, &bytes);
//!     }
//! }
//! assert!(client.state::<Lamp>(lamp).unwrap().lit);
//! assert!(client.server_tick() > Tick::START);
//! ```

mod channel;
mod client;
mod clock;
mod config;
mod entity;
mod error;
mod notify;
mod protocol;
mod server;
mod transport;

pub use channel::{EventChannel, SequenceWindow};
pub use client::ClientRoom;
pub use clock::Clock;
pub use config::{ConfigError, RoomConfig, CHUNK_IDS};
pub use entity::{Entity, TickContext};
pub use error::{RoomError, RoomResult};
pub use notify::{ClientNotification, ServerNotification};
pub use protocol::{NoCommand, Protocol};
pub use server::ServerRoom;
pub use transport::{Outbox, Transport, SERVER_PEER};

pub use repgraph::{AlwaysInScope, Candidate, PeerId, ScopeEvaluator, SpatialScope, Vec3};
