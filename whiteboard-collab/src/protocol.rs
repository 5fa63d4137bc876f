//! Named events and the frame they travel in.
//!
//! Peers talk in `(event, payload)` pairs. Payloads are the canonical board
//! strings from `whiteboard_core::codec`; the pair itself is bincode-encoded
//! into one WebSocket binary message:
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ event name       │ payload                      │
//! │ len-prefixed str │ len-prefixed str             │
//! └──────────────────┴──────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use whiteboard_core::OpKind;

use crate::error::CollabError;

/// Every event a peer can send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Subscribe to a board (`peer:port:name`).
    BoardListen,
    /// Unsubscribe from a board.
    BoardUnlisten,
    /// Ask for the full state of a board.
    GetBoardData,
    /// Full state, `id%version%log`.
    BoardData,
    /// Proposal to add a path, `id%base%path`.
    BoardPathUpdate,
    /// Owner accepted an add.
    BoardPathAccepted,
    /// Proposal to undo, `id%base%`.
    BoardUndoUpdate,
    BoardUndoAccepted,
    /// Proposal to clear, `id%base%`.
    BoardClearUpdate,
    BoardClearAccepted,
    /// The board no longer exists.
    BoardDeleted,
    /// Free-form protocol error report.
    BoardError,
    /// To discovery server: this board is now shared.
    ShareBoard,
    /// To discovery server: this board is no longer shared.
    UnshareBoard,
    /// From discovery server: some peer shares this board.
    SharingBoard,
    /// From discovery server: this board is no longer shared.
    UnsharingBoard,
}

impl Event {
    /// Events a peer handles from other peers.
    pub const PEER_EVENTS: [Event; 12] = [
        Event::BoardListen,
        Event::BoardUnlisten,
        Event::GetBoardData,
        Event::BoardData,
        Event::BoardPathUpdate,
        Event::BoardPathAccepted,
        Event::BoardUndoUpdate,
        Event::BoardUndoAccepted,
        Event::BoardClearUpdate,
        Event::BoardClearAccepted,
        Event::BoardDeleted,
        Event::BoardError,
    ];

    /// Events a peer handles from the discovery server.
    pub const DISCOVERY_EVENTS: [Event; 2] = [Event::SharingBoard, Event::UnsharingBoard];

    pub fn name(&self) -> &'static str {
        match self {
            Event::BoardListen => "BOARD_LISTEN",
            Event::BoardUnlisten => "BOARD_UNLISTEN",
            Event::GetBoardData => "GET_BOARD_DATA",
            Event::BoardData => "BOARD_DATA",
            Event::BoardPathUpdate => "BOARD_PATH_UPDATE",
            Event::BoardPathAccepted => "BOARD_PATH_ACCEPTED",
            Event::BoardUndoUpdate => "BOARD_UNDO_UPDATE",
            Event::BoardUndoAccepted => "BOARD_UNDO_ACCEPTED",
            Event::BoardClearUpdate => "BOARD_CLEAR_UPDATE",
            Event::BoardClearAccepted => "BOARD_CLEAR_ACCEPTED",
            Event::BoardDeleted => "BOARD_DELETED",
            Event::BoardError => "BOARD_ERROR",
            Event::ShareBoard => "SHARE_BOARD",
            Event::UnshareBoard => "UNSHARE_BOARD",
            Event::SharingBoard => "sharingBoard",
            Event::UnsharingBoard => "unsharingBoard",
        }
    }

    pub fn from_name(name: &str) -> Option<Event> {
        let event = match name {
            "BOARD_LISTEN" => Event::BoardListen,
            "BOARD_UNLISTEN" => Event::BoardUnlisten,
            "GET_BOARD_DATA" => Event::GetBoardData,
            "BOARD_DATA" => Event::BoardData,
            "BOARD_PATH_UPDATE" => Event::BoardPathUpdate,
            "BOARD_PATH_ACCEPTED" => Event::BoardPathAccepted,
            "BOARD_UNDO_UPDATE" => Event::BoardUndoUpdate,
            "BOARD_UNDO_ACCEPTED" => Event::BoardUndoAccepted,
            "BOARD_CLEAR_UPDATE" => Event::BoardClearUpdate,
            "BOARD_CLEAR_ACCEPTED" => Event::BoardClearAccepted,
            "BOARD_DELETED" => Event::BoardDeleted,
            "BOARD_ERROR" => Event::BoardError,
            "SHARE_BOARD" => Event::ShareBoard,
            "UNSHARE_BOARD" => Event::UnshareBoard,
            "sharingBoard" => Event::SharingBoard,
            "unsharingBoard" => Event::UnsharingBoard,
            _ => return None,
        };
        Some(event)
    }

    /// Proposal event for a mutation kind.
    pub fn update(kind: OpKind) -> Event {
        match kind {
            OpKind::AddPath => Event::BoardPathUpdate,
            OpKind::Undo => Event::BoardUndoUpdate,
            OpKind::Clear => Event::BoardClearUpdate,
        }
    }

    /// Confirmation event for a mutation kind.
    pub fn accepted(kind: OpKind) -> Event {
        match kind {
            OpKind::AddPath => Event::BoardPathAccepted,
            OpKind::Undo => Event::BoardUndoAccepted,
            OpKind::Clear => Event::BoardClearAccepted,
        }
    }

    /// Mutation kind carried by a proposal or confirmation event.
    pub fn op_kind(&self) -> Option<OpKind> {
        match self {
            Event::BoardPathUpdate | Event::BoardPathAccepted => Some(OpKind::AddPath),
            Event::BoardUndoUpdate | Event::BoardUndoAccepted => Some(OpKind::Undo),
            Event::BoardClearUpdate | Event::BoardClearAccepted => Some(OpKind::Clear),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `(event, payload)` pair on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    pub payload: String,
}

impl Frame {
    pub fn new(event: Event, payload: impl Into<String>) -> Self {
        Self {
            event: event.name().to_string(),
            payload: payload.into(),
        }
    }

    /// The known event this frame carries, if any.
    pub fn event(&self) -> Option<Event> {
        Event::from_name(&self.event)
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, CollabError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CollabError::Transport(format!("frame encode: {e}")))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CollabError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CollabError::Transport(format!("frame decode: {e}")))?;
        Ok(frame)
    }
}
