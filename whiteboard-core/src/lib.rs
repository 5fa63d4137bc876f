//! # whiteboard-core: board data model and wire codec
//!
//! No I/O lives here. This crate defines what a board is, the version gate
//! that decides whether a mutation is accepted, and the canonical string form
//! boards and operations travel in.
//!
//! ## Modules
//!
//! - [`id`]: peer addresses and `peer:port:name` board identifiers
//! - [`path`]: strokes (color, width, points)
//! - [`board`]: versioned board and its accept/reject rule
//! - [`codec`]: `id%version%payload` encoding of states and operations

pub mod board;
pub mod codec;
pub mod id;
pub mod path;

pub use board::{Board, Role};
pub use codec::{BoardState, OpKind, Operation, OperationMessage, WireError};
pub use id::{BoardId, PeerAddr};
pub use path::{Color, Path, Point};
