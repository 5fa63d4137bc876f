use thiserror::Error;
use uuid::Uuid;
use whiteboard_core::{BoardId, WireError};

/// Errors raised while replicating boards between peers.
///
/// A stale base version is not an error: it comes back as
/// [`Outcome::Rejected`](crate::actor::Outcome::Rejected).
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("unknown board {0}")]
    UnknownBoard(String),

    #[error(transparent)]
    MalformedMessage(#[from] WireError),

    #[error("peer session {0} is unreachable")]
    PeerUnreachable(Uuid),

    #[error("board {0} already exists")]
    DuplicateBoard(BoardId),

    #[error("board {0} is not owned by this peer")]
    NotOwner(BoardId),

    #[error("board {0} is not shared")]
    NotShared(BoardId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("board actor for {0} has stopped")]
    ActorStopped(BoardId),
}

impl CollabError {
    /// Whether the error should be reported back to the requesting peer.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, CollabError::PeerUnreachable(_) | CollabError::Transport(_))
    }
}
