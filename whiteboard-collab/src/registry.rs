//! Board registry: board id to running board actor.
//!
//! Adding spawns the board's actor; removing asks the actor to announce the
//! deletion and stop. Removal holds the write lock until the actor has
//! answered, so no lookup can hand out a board that is being deleted.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use whiteboard_core::{Board, BoardId, PeerAddr};

use crate::actor::{BoardActor, BoardHandle, Deleted};
use crate::broadcast::FanoutCounters;
use crate::error::CollabError;
use crate::session::PeerSession;

pub struct BoardRegistry {
    boards: RwLock<HashMap<BoardId, BoardHandle>>,
    /// Board selected in the front end. Engine calls never consult it.
    active: RwLock<Option<BoardId>>,
    counters: Arc<FanoutCounters>,
    actor_capacity: usize,
}

impl BoardRegistry {
    pub fn new(counters: Arc<FanoutCounters>, actor_capacity: usize) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            counters,
            actor_capacity,
        }
    }

    /// Start an actor for `board`. Fails if a board with the same id exists.
    pub async fn add(
        &self,
        board: Board,
        upstream: Option<PeerSession>,
        make_active: bool,
    ) -> Result<BoardHandle, CollabError> {
        let id = board.id().clone();
        let mut boards = self.boards.write().await;
        if boards.contains_key(&id) {
            return Err(CollabError::DuplicateBoard(id));
        }
        let handle = BoardActor::spawn(board, upstream, self.counters.clone(), self.actor_capacity);
        boards.insert(id.clone(), handle.clone());
        drop(boards);

        if make_active {
            *self.active.write().await = Some(id.clone());
        }
        log::info!("Added board {id} ({:?})", handle.role());
        Ok(handle)
    }

    /// Delete a board, announcing it first, and forget it.
    pub async fn remove(&self, id: &BoardId, notify_upstream: bool) -> Result<Deleted, CollabError> {
        let mut boards = self.boards.write().await;
        let handle = boards
            .remove(id)
            .ok_or_else(|| CollabError::UnknownBoard(id.to_string()))?;
        let deleted = handle.delete(notify_upstream).await;
        drop(boards);

        let mut active = self.active.write().await;
        if active.as_ref() == Some(id) {
            *active = None;
        }
        deleted
    }

    pub async fn get(&self, id: &BoardId) -> Option<BoardHandle> {
        self.boards.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &BoardId) -> bool {
        self.boards.read().await.contains_key(id)
    }

    /// All board ids, sorted.
    pub async fn list(&self) -> Vec<BoardId> {
        let mut ids: Vec<BoardId> = self.boards.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn handles(&self) -> Vec<BoardHandle> {
        self.boards.read().await.values().cloned().collect()
    }

    /// Ids of the mirrors of boards owned by `owner`.
    pub async fn mirrors_of(&self, owner: &PeerAddr) -> Vec<BoardId> {
        let mut ids: Vec<BoardId> = self
            .boards
            .read()
            .await
            .values()
            .filter(|h| !h.is_owner() && h.id().owner() == owner)
            .map(|h| h.id().clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.boards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.boards.read().await.is_empty()
    }

    pub async fn active(&self) -> Option<BoardId> {
        self.active.read().await.clone()
    }

    pub async fn set_active(&self, id: &BoardId) -> Result<(), CollabError> {
        if !self.contains(id).await {
            return Err(CollabError::UnknownBoard(id.to_string()));
        }
        *self.active.write().await = Some(id.clone());
        Ok(())
    }
}
