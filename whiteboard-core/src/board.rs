//! Versioned board with the optimistic-concurrency mutation gate.
//!
//! Every mutation carries the version its author observed. It is accepted only
//! if that still equals the board's version; acceptance bumps the version by
//! exactly one. A rejected mutation changes nothing.

use serde::{Deserialize, Serialize};

use crate::codec::{self, BoardState, Operation, WireError};
use crate::id::BoardId;
use crate::path::Path;

/// Whether this process holds the authoritative copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Created here; accepts mutations.
    Owner,
    /// Replica of another peer's board; fed by the owner.
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    id: BoardId,
    version: u64,
    paths: Vec<Path>,
    shared: bool,
    role: Role,
}

impl Board {
    /// A fresh board created by the local user: version 0, empty, unshared.
    pub fn new_local(id: BoardId) -> Self {
        Self {
            id,
            version: 0,
            paths: Vec::new(),
            shared: false,
            role: Role::Owner,
        }
    }

    /// A mirror of a remote board. Empty until the first full-state load.
    pub fn new_mirror(id: BoardId) -> Self {
        Self {
            id,
            version: 0,
            paths: Vec::new(),
            shared: false,
            role: Role::Mirror,
        }
    }

    pub fn id(&self) -> &BoardId {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    /// Shared flag. Always false on mirrors.
    pub fn is_shared(&self) -> bool {
        self.shared && self.is_owner()
    }

    /// Set the shared flag. Ignored on mirrors; returns whether the flag
    /// changed.
    pub fn set_shared(&mut self, shared: bool) -> bool {
        if !self.is_owner() || self.shared == shared {
            return false;
        }
        self.shared = shared;
        true
    }

    pub fn add_path(&mut self, path: Path, base_version: u64) -> bool {
        if !self.gate(base_version) {
            return false;
        }
        self.paths.push(path);
        self.bump();
        true
    }

    /// Remove the last path. Accepted on an empty log too.
    pub fn undo(&mut self, base_version: u64) -> bool {
        if !self.gate(base_version) {
            return false;
        }
        self.paths.pop();
        self.bump();
        true
    }

    pub fn clear(&mut self, base_version: u64) -> bool {
        if !self.gate(base_version) {
            return false;
        }
        self.paths.clear();
        self.bump();
        true
    }

    /// Apply any [`Operation`] through the same gate.
    pub fn apply(&mut self, op: &Operation, base_version: u64) -> bool {
        match op {
            Operation::AddPath(path) => self.add_path(path.clone(), base_version),
            Operation::Undo => self.undo(base_version),
            Operation::Clear => self.clear(base_version),
        }
    }

    pub fn state(&self) -> BoardState {
        BoardState {
            id: self.id.clone(),
            version: self.version,
            paths: self.paths.clone(),
        }
    }

    /// Full state in canonical form, `id%version%log`.
    pub fn serialize(&self) -> String {
        self.state().encode()
    }

    /// Replace version and log from `version%log` data for board `id`.
    ///
    /// The data is fully decoded before anything is replaced, so an error
    /// leaves the board untouched.
    pub fn load_from(&mut self, id: &BoardId, encoded: &str) -> Result<(), WireError> {
        let (version, log) = encoded.split_once(codec::FRAME_SEPARATOR).ok_or_else(|| {
            WireError::MalformedMessage(format!("expected version%log, got {encoded:?}"))
        })?;
        let version = version
            .parse::<u64>()
            .map_err(|_| WireError::MalformedMessage(format!("non-numeric version {version:?}")))?;
        let paths = codec::decode_log(log)?;
        self.restore(BoardState {
            id: id.clone(),
            version,
            paths,
        })
    }

    /// Replace version and log wholesale from a decoded state.
    ///
    /// This is the resync path, so the version may move backwards as well as
    /// forwards.
    pub fn restore(&mut self, state: BoardState) -> Result<(), WireError> {
        if state.id != self.id {
            return Err(WireError::MalformedMessage(format!(
                "state for {} loaded into board {}",
                state.id, self.id
            )));
        }
        self.version = state.version;
        self.paths = state.paths;
        Ok(())
    }

    fn gate(&self, base_version: u64) -> bool {
        if base_version != self.version {
            log::trace!(
                "board {}: rejecting mutation at {base_version}, current {}",
                self.id,
                self.version
            );
            return false;
        }
        true
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::id::PeerAddr;
    use crate::path::{Color, Point};
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn board() -> Board {
        Board::new_local(BoardId::new(PeerAddr::new("h", 1), "b"))
    }

    fn op(kind: u8, n: i32) -> Operation {
        match kind % 3 {
            0 => Operation::AddPath(Path::new(Color::BLACK, 1, vec![Point::new(n, -n)])),
            1 => Operation::Undo,
            _ => Operation::Clear,
        }
    }

    proptest! {
        /// Each step proposes against the current version or a random one.
        #[test]
        fn test_version_counts_accepted_in_any_sequence(
            steps in vec((any::<u8>(), any::<i32>(), any::<bool>(), 0u64..64), 0..60),
        ) {
            let mut b = board();
            let mut accepted = 0u64;
            for (kind, n, fresh, guess) in steps {
                let base = if fresh { b.version() } else { guess };
                let before = (b.version(), b.paths().to_vec());
                if b.apply(&op(kind, n), base) {
                    accepted += 1;
                    prop_assert_eq!(b.version(), before.0 + 1);
                } else {
                    prop_assert_eq!((b.version(), b.paths().to_vec()), before);
                }
            }
            prop_assert_eq!(b.version(), accepted);
        }

        #[test]
        fn test_stale_base_leaves_board_unchanged(
            setup in vec((any::<u8>(), any::<i32>()), 0..20),
            kind in any::<u8>(),
            base in any::<u64>(),
        ) {
            let mut b = board();
            for (k, n) in setup {
                let v = b.version();
                b.apply(&op(k, n), v);
            }
            prop_assume!(base != b.version());
            let before = (b.version(), b.paths().to_vec());
            prop_assert!(!b.apply(&op(kind, 7), base));
            prop_assert_eq!((b.version(), b.paths().to_vec()), before);
        }
    }
}
