//! Canonical string codec for board state and operations.
//!
//! Every message body has the shape:
//! ```text
//! ┌──────────────────┬───┬─────────┬───┬──────────────────────────┐
//! │ peer:port:name   │ % │ version │ % │ payload                  │
//! └──────────────────┴───┴─────────┴───┴──────────────────────────┘
//! ```
//! The payload is a full path log (`BOARD_DATA`), a single path (add) or
//! empty (undo / clear). Paths inside a log are joined with `%` as well, so
//! the frame is split on the first two `%` only.
//!
//! Separators are plain characters with no escaping. An identifier containing
//! `%`, or a host containing `:`, cannot be represented and will not decode
//! back to the same value. The format is kept as is for compatibility with
//! existing peers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::id::BoardId;
use crate::path::Path;

/// Between identifier, version and payload, and between paths of a log.
pub const FRAME_SEPARATOR: &str = "%";
/// Between the parts of a board identifier.
pub const ID_SEPARATOR: &str = ":";
/// Between color, width and point list of a path.
pub const FIELD_SEPARATOR: &str = ",";
/// Between the points of a path.
pub const POINT_SEPARATOR: &str = ";";
/// Between the x and y coordinate of a point.
pub const COORD_SEPARATOR: &str = " ";

/// Decoding failure. Decoding never touches board state, so a failed decode
/// leaves everything as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl WireError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        WireError::MalformedMessage(reason.into())
    }
}

/// Split `id%version%payload` into its three parts.
pub fn split_frame(s: &str) -> Result<(BoardId, u64, &str), WireError> {
    let mut parts = s.splitn(3, FRAME_SEPARATOR);
    let (Some(id), Some(version), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(WireError::malformed(format!(
            "expected id%version%payload, got {s:?}"
        )));
    };
    let id = id.parse::<BoardId>()?;
    let version = version
        .parse::<u64>()
        .map_err(|_| WireError::malformed(format!("non-numeric version {version:?}")))?;
    Ok((id, version, payload))
}

/// Encode a path log. The empty log encodes to the empty string.
pub fn encode_log(paths: &[Path]) -> String {
    paths
        .iter()
        .map(Path::encode)
        .collect::<Vec<_>>()
        .join(FRAME_SEPARATOR)
}

/// Decode a path log produced by [`encode_log`].
pub fn decode_log(s: &str) -> Result<Vec<Path>, WireError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(FRAME_SEPARATOR).map(Path::decode).collect()
}

/// Full state of a board as transferred in `BOARD_DATA`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub id: BoardId,
    pub version: u64,
    pub paths: Vec<Path>,
}

impl BoardState {
    pub fn encode(&self) -> String {
        format!(
            "{}{FRAME_SEPARATOR}{}{FRAME_SEPARATOR}{}",
            self.id,
            self.version,
            encode_log(&self.paths)
        )
    }

    pub fn decode(s: &str) -> Result<Self, WireError> {
        let (id, version, log) = split_frame(s)?;
        Ok(Self {
            id,
            version,
            paths: decode_log(log)?,
        })
    }
}

/// The three version-gated mutations, without their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    AddPath,
    Undo,
    Clear,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::AddPath => "add-path",
            OpKind::Undo => "undo",
            OpKind::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// A board mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    AddPath(Path),
    Undo,
    Clear,
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::AddPath(_) => OpKind::AddPath,
            Operation::Undo => OpKind::Undo,
            Operation::Clear => OpKind::Clear,
        }
    }
}

/// An operation addressed to a board, stamped with the version it was
/// proposed (or accepted) against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMessage {
    pub board: BoardId,
    pub base_version: u64,
    pub op: Operation,
}

impl OperationMessage {
    pub fn new(board: BoardId, base_version: u64, op: Operation) -> Self {
        Self {
            board,
            base_version,
            op,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn encode(&self) -> String {
        let payload = match &self.op {
            Operation::AddPath(path) => path.encode(),
            Operation::Undo | Operation::Clear => String::new(),
        };
        format!(
            "{}{FRAME_SEPARATOR}{}{FRAME_SEPARATOR}{payload}",
            self.board, self.base_version
        )
    }

    /// Decode a message body. The kind comes from the event name, since the
    /// body alone does not say which mutation it carries.
    pub fn decode(kind: OpKind, s: &str) -> Result<Self, WireError> {
        let (board, base_version, payload) = split_frame(s)?;
        let op = match kind {
            OpKind::AddPath => {
                if payload.contains(FRAME_SEPARATOR) {
                    return Err(WireError::malformed("add-path carries more than one path"));
                }
                Operation::AddPath(Path::decode(payload)?)
            }
            OpKind::Undo | OpKind::Clear if !payload.is_empty() => {
                return Err(WireError::malformed(format!("{kind} carries a payload")));
            }
            OpKind::Undo => Operation::Undo,
            OpKind::Clear => Operation::Clear,
        };
        Ok(Self::new(board, base_version, op))
    }
}

impl FromStr for BoardState {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
