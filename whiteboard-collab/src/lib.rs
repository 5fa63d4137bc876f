//! # whiteboard-collab: board replication between peers
//!
//! Single-writer replication: the peer that created a board owns it and is
//! the only one that accepts edits. Other peers hold mirrors fed by the
//! owner's confirmations, and repair any divergence with a full-state fetch.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  BOARD_*_UPDATE   ┌──────────────┐
//! │ Mirror peer  │ ───────────────►  │ Owner peer   │
//! │ board actor  │                   │ board actor  │
//! │ (mirror)     │ ◄───────────────  │ version gate │
//! └──────────────┘  BOARD_*_ACCEPTED └──────┬───────┘
//!                                           │ fan-out
//!                                    ┌──────┴───────┐
//!                                    ▼              ▼
//!                               Mirror peer    Mirror peer
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: event names and the bincode frame they travel in
//! - [`session`]: one connection: emit / on / close
//! - [`broadcast`]: ordered subscriber fan-out with drop-on-failure
//! - [`actor`]: one task per board; the unit of serialization
//! - [`registry`]: board id to actor, plus the front end's active board
//! - [`engine`]: routing, mirrors, upstream sessions, discovery
//! - [`server`] / [`client`]: WebSocket transport
//! - [`sim`]: in-process transport for tests

pub mod actor;
pub mod broadcast;
pub mod client;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod sim;

pub use actor::{BoardHandle, BoardSnapshot, Deleted, Outcome};
pub use broadcast::BroadcastStats;
pub use client::WsConnector;
pub use engine::{Connector, EngineConfig, ReplicationEngine, SessionSetup};
pub use error::CollabError;
pub use protocol::{Event, Frame};
pub use server::{PeerServer, ServerConfig, ServerStats};
pub use session::PeerSession;
pub use sim::MemoryNetwork;
