//! Replication engine.
//!
//! Routes local edits and inbound events to the right board actor, creates
//! and removes mirrors as the discovery server announces shared boards, and
//! keeps one upstream session per remote owner.
//!
//! ```text
//!  front end ──propose(id, base, op)──┐
//!                                     ▼
//!  peer session ──event handlers──► engine ──► registry ──► board actor
//!                                     │                       │
//!  discovery ◄──SHARE/UNSHARE_BOARD───┘        subscribers ◄──┘ *_ACCEPTED
//! ```
//!
//! Every call names its board explicitly; the engine has no notion of a
//! current board.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use whiteboard_core::{Board, BoardId, BoardState, OpKind, Operation, OperationMessage, Path, PeerAddr};

use crate::actor::{BoardHandle, BoardSnapshot, Deleted, Outcome};
use crate::broadcast::{BroadcastStats, FanoutCounters};
use crate::error::CollabError;
use crate::protocol::Event;
use crate::registry::BoardRegistry;
use crate::session::PeerSession;

/// Handler registration run on a fresh session before any frame is read.
pub type SessionSetup = Box<dyn FnOnce(&PeerSession) + Send>;

/// Opens outbound sessions to other peers.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        addr: &'a PeerAddr,
        setup: SessionSetup,
    ) -> BoxFuture<'a, Result<PeerSession, CollabError>>;
}

/// Queue sizes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Outgoing frames buffered per session before it counts as unreachable
    pub session_capacity: usize,
    /// Commands buffered per board actor
    pub actor_capacity: usize,
    /// Longest wait for an outbound connection to open
    pub connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_capacity: 256,
            actor_capacity: 32,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct EngineInner {
    local: PeerAddr,
    config: EngineConfig,
    registry: BoardRegistry,
    counters: Arc<FanoutCounters>,
    connector: Arc<dyn Connector>,
    upstreams: Mutex<HashMap<PeerAddr, PeerSession>>,
    discovery: RwLock<Option<PeerSession>>,
}

#[derive(Clone)]
pub struct ReplicationEngine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine reference held by session handlers.
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<ReplicationEngine> {
        self.inner.upgrade().map(|inner| ReplicationEngine { inner })
    }
}

impl ReplicationEngine {
    pub fn new(local: PeerAddr, connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        let counters = Arc::new(FanoutCounters::new());
        Self {
            inner: Arc::new(EngineInner {
                registry: BoardRegistry::new(counters.clone(), config.actor_capacity),
                local,
                config,
                counters,
                connector,
                upstreams: Mutex::new(HashMap::new()),
                discovery: RwLock::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Address this peer advertises in the ids of its own boards.
    pub fn local_addr(&self) -> &PeerAddr {
        &self.inner.local
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &BoardRegistry {
        &self.inner.registry
    }

    pub fn stats(&self) -> BroadcastStats {
        self.inner.counters.snapshot()
    }

    // ── Local board lifecycle ─────────────────────────────────

    /// Create an owned, unshared board named `name` on this peer.
    pub async fn create_board(
        &self,
        name: impl Into<String>,
        make_active: bool,
    ) -> Result<BoardId, CollabError> {
        let id = BoardId::new(self.inner.local.clone(), name);
        self.inner
            .registry
            .add(Board::new_local(id.clone()), None, make_active)
            .await?;
        Ok(id)
    }

    /// Create a board named `board<epoch-millis>`.
    pub async fn create_timestamped_board(&self, make_active: bool) -> Result<BoardId, CollabError> {
        let mut millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        loop {
            match self.create_board(format!("board{millis}"), make_active).await {
                Err(CollabError::DuplicateBoard(_)) => millis += 1,
                other => return other,
            }
        }
    }

    pub async fn boards(&self) -> Vec<BoardId> {
        self.inner.registry.list().await
    }

    pub async fn snapshot(&self, id: &BoardId) -> Result<BoardSnapshot, CollabError> {
        self.board(id).await?.snapshot().await
    }

    /// Share or unshare an owned board and tell the discovery server.
    ///
    /// Returns whether the flag changed.
    pub async fn set_shared(&self, id: &BoardId, shared: bool) -> Result<bool, CollabError> {
        let handle = self.board(id).await?;
        if !handle.is_owner() {
            return Err(CollabError::NotOwner(id.clone()));
        }
        let changed = handle.set_shared(shared).await?;
        if changed {
            let event = if shared {
                Event::ShareBoard
            } else {
                Event::UnshareBoard
            };
            self.announce(event, id);
        }
        Ok(changed)
    }

    /// Delete a board. Shared owner boards tell their subscribers and the
    /// discovery server; mirrors unsubscribe from their owner.
    pub async fn delete_board(&self, id: &BoardId) -> Result<Deleted, CollabError> {
        let deleted = self.inner.registry.remove(id, true).await?;
        if deleted.was_shared {
            self.announce(Event::UnshareBoard, id);
        }
        Ok(deleted)
    }

    // ── Local edits ───────────────────────────────────────────

    /// Propose an edit made against `base`, the version the user saw.
    pub async fn propose(
        &self,
        id: &BoardId,
        base: u64,
        op: Operation,
    ) -> Result<Outcome, CollabError> {
        self.board(id).await?.propose(op, base).await
    }

    pub async fn add_path(&self, id: &BoardId, base: u64, path: Path) -> Result<Outcome, CollabError> {
        self.propose(id, base, Operation::AddPath(path)).await
    }

    pub async fn undo(&self, id: &BoardId, base: u64) -> Result<Outcome, CollabError> {
        self.propose(id, base, Operation::Undo).await
    }

    pub async fn clear(&self, id: &BoardId, base: u64) -> Result<Outcome, CollabError> {
        self.propose(id, base, Operation::Clear).await
    }

    // ── Sessions ──────────────────────────────────────────────

    /// Serve board events arriving on a peer session.
    pub fn attach(&self, session: &PeerSession) {
        for event in Event::PEER_EVENTS {
            let engine = self.downgrade();
            session.on(event, move |session, payload| {
                let engine = engine.clone();
                async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_peer_event(session, event, payload).await;
                    }
                }
            });
        }
        let engine = self.downgrade();
        session.on_close(move |session| async move {
            if let Some(engine) = engine.upgrade() {
                engine.disconnect(&session).await;
            }
        });
        log::debug!("Attached session {} ({})", session.id(), session.remote());
    }

    /// Use `session` as the link to the discovery server.
    pub fn attach_discovery(&self, session: &PeerSession) {
        for event in Event::DISCOVERY_EVENTS.into_iter().chain([Event::BoardError]) {
            let engine = self.downgrade();
            session.on(event, move |_, payload| {
                let engine = engine.clone();
                async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_discovery_event(event, payload).await;
                    }
                }
            });
        }
        let engine = self.downgrade();
        session.on_close(move |session| async move {
            if let Some(engine) = engine.upgrade() {
                engine.forget_discovery(&session);
            }
        });
        *self
            .inner
            .discovery
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session.clone());
    }

    /// Connect to the discovery server and announce the boards already shared.
    pub async fn connect_discovery(&self, addr: &PeerAddr) -> Result<(), CollabError> {
        let engine = self.clone();
        self.connect(addr, Box::new(move |session: &PeerSession| {
            engine.attach_discovery(session)
        }))
        .await?;
        log::info!("Connected to discovery server at {addr}");

        for handle in self.inner.registry.handles().await {
            if handle.is_owner() && handle.snapshot().await?.shared {
                self.announce(Event::ShareBoard, handle.id());
            }
        }
        Ok(())
    }

    pub fn has_discovery(&self) -> bool {
        self.discovery().is_some()
    }

    /// The session to the owner at `addr`, opening it if needed.
    ///
    /// The upstream table is not locked while connecting. If two callers
    /// race, the first session stored wins and the other is closed.
    pub async fn upstream_for(&self, addr: &PeerAddr) -> Result<PeerSession, CollabError> {
        if let Some(session) = self.live_upstream(addr).await {
            return Ok(session);
        }
        let engine = self.clone();
        let session = self
            .connect(addr, Box::new(move |session: &PeerSession| engine.attach(session)))
            .await?;

        let mut upstreams = self.inner.upstreams.lock().await;
        if let Some(existing) = upstreams.get(addr).filter(|s| !s.is_closed()).cloned() {
            drop(upstreams);
            log::debug!("Upstream to {addr} already open; closing session {}", session.id());
            session.close().await;
            return Ok(existing);
        }
        upstreams.insert(addr.clone(), session.clone());
        log::info!("Opened upstream session {} to {addr}", session.id());
        Ok(session)
    }

    async fn live_upstream(&self, addr: &PeerAddr) -> Option<PeerSession> {
        self.inner
            .upstreams
            .lock()
            .await
            .get(addr)
            .filter(|s| !s.is_closed())
            .cloned()
    }

    async fn connect(&self, addr: &PeerAddr, setup: SessionSetup) -> Result<PeerSession, CollabError> {
        let limit = self.inner.config.connect_timeout;
        tokio::time::timeout(limit, self.inner.connector.connect(addr, setup))
            .await
            .map_err(|_| CollabError::Transport(format!("connect to {addr} timed out after {limit:?}")))?
    }

    /// Create a mirror of a remote board and subscribe to it.
    ///
    /// Returns `None` when the board is this peer's own or already known.
    pub async fn mirror_board(&self, id: &BoardId) -> Result<Option<BoardHandle>, CollabError> {
        if id.owner() == &self.inner.local {
            log::debug!("Ignoring share notice for own board {id}");
            return Ok(None);
        }
        if self.inner.registry.contains(id).await {
            return Ok(None);
        }
        let upstream = self.upstream_for(id.owner()).await?;
        let handle = match self
            .inner
            .registry
            .add(Board::new_mirror(id.clone()), Some(upstream.clone()), false)
            .await
        {
            Ok(handle) => handle,
            Err(CollabError::DuplicateBoard(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if let Err(e) = upstream.emit(Event::BoardListen, id.to_string()) {
            self.inner.registry.remove(id, false).await?;
            return Err(e);
        }
        Ok(Some(handle))
    }

    /// Forget a session: drop it from every subscriber list and, if it was
    /// the link to an owner, drop the mirrors fed through it.
    pub async fn disconnect(&self, session: &PeerSession) {
        let session_id = session.id();
        for handle in self.inner.registry.handles().await {
            if handle.is_owner() {
                if let Err(e) = handle.unsubscribe(session_id).await {
                    log::debug!("Unsubscribe {session_id} from {}: {e}", handle.id());
                }
            }
        }

        let owner = {
            let mut upstreams = self.inner.upstreams.lock().await;
            let owner = upstreams
                .iter()
                .find(|(_, s)| s.id() == session_id)
                .map(|(addr, _)| addr.clone());
            if let Some(addr) = &owner {
                upstreams.remove(addr);
            }
            owner
        };
        if let Some(owner) = owner {
            log::info!("Upstream session to {owner} closed");
            for id in self.inner.registry.mirrors_of(&owner).await {
                if let Err(e) = self.inner.registry.remove(&id, false).await {
                    log::debug!("Removing mirror {id}: {e}");
                }
            }
        }
    }

    /// Delete every board, announcing as usual, then close outbound sessions.
    pub async fn shutdown(&self) {
        for id in self.boards().await {
            if let Err(e) = self.delete_board(&id).await {
                log::warn!("Deleting {id} on shutdown: {e}");
            }
        }
        let upstreams: Vec<PeerSession> = self.inner.upstreams.lock().await.values().cloned().collect();
        for session in upstreams {
            session.close().await;
        }
        if let Some(discovery) = self.discovery() {
            discovery.close().await;
        }
        log::info!("Engine for {} shut down", self.inner.local);
    }

    // ── Inbound events ────────────────────────────────────────

    async fn on_peer_event(&self, session: PeerSession, event: Event, payload: String) {
        if let Err(e) = self.handle_peer_event(&session, event, &payload).await {
            log::warn!("{event} from {}: {e}", session.remote());
            if is_request(event) && e.is_reportable() {
                let _ = session.emit(Event::BoardError, e.to_string());
            }
        }
    }

    async fn handle_peer_event(
        &self,
        session: &PeerSession,
        event: Event,
        payload: &str,
    ) -> Result<(), CollabError> {
        if let Some(kind) = event.op_kind() {
            return self.handle_operation(session, event, kind, payload).await;
        }
        match event {
            Event::BoardListen => {
                let id: BoardId = payload.parse()?;
                self.board(&id).await?.subscribe(session.clone()).await
            }
            Event::BoardUnlisten => {
                let id: BoardId = payload.parse()?;
                self.board(&id).await?.unsubscribe(session.id()).await?;
                Ok(())
            }
            Event::GetBoardData => {
                let id: BoardId = payload.parse()?;
                self.board(&id).await?.send_state(session.clone()).await
            }
            Event::BoardData => {
                let state = BoardState::decode(payload)?;
                let id = state.id.clone();
                self.board(&id).await?.load_state(state).await?;
                Ok(())
            }
            Event::BoardDeleted => {
                let id: BoardId = payload.parse()?;
                self.drop_mirror(&id).await
            }
            Event::BoardError => {
                log::warn!("Peer {} reported: {payload}", session.remote());
                self.drop_refused_mirrors(session, payload).await;
                Ok(())
            }
            _ => {
                log::debug!("Unexpected {event} on peer session {}", session.id());
                Ok(())
            }
        }
    }

    async fn handle_operation(
        &self,
        session: &PeerSession,
        event: Event,
        kind: OpKind,
        payload: &str,
    ) -> Result<(), CollabError> {
        let msg = OperationMessage::decode(kind, payload)?;
        let handle = self.board(&msg.board).await?;
        let outcome = if event == Event::update(kind) {
            handle
                .proposal(session.clone(), msg.op, msg.base_version)
                .await?
        } else {
            handle.accepted(msg.op, msg.base_version).await?
        };
        log::debug!("{event} for {} at {}: {outcome:?}", msg.board, msg.base_version);
        Ok(())
    }

    async fn on_discovery_event(&self, event: Event, payload: String) {
        let result = match event {
            Event::SharingBoard => match payload.parse::<BoardId>() {
                Ok(id) => self.mirror_board(&id).await.map(|_| ()),
                Err(e) => Err(e.into()),
            },
            Event::UnsharingBoard => match payload.parse::<BoardId>() {
                Ok(id) => self.drop_mirror(&id).await,
                Err(e) => Err(e.into()),
            },
            _ => {
                log::warn!("Discovery server reported: {payload}");
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("{event} {payload}: {e}");
        }
    }

    /// An owner answers a refused `BOARD_LISTEN` with an error naming the
    /// board. Mirrors it names that never received a full state are removed.
    async fn drop_refused_mirrors(&self, session: &PeerSession, report: &str) {
        let owner = self
            .inner
            .upstreams
            .lock()
            .await
            .iter()
            .find(|(_, s)| s.id() == session.id())
            .map(|(addr, _)| addr.clone());
        let Some(owner) = owner else {
            return;
        };
        for id in self.inner.registry.mirrors_of(&owner).await {
            let name = id.to_string();
            if !report.split_whitespace().any(|word| word == name) {
                continue;
            }
            let synced = match self.snapshot(&id).await {
                Ok(snapshot) => snapshot.synced,
                Err(_) => continue,
            };
            if !synced {
                if let Err(e) = self.inner.registry.remove(&id, false).await {
                    log::debug!("Removing refused mirror {id}: {e}");
                } else {
                    log::info!("Owner {owner} refused subscription to {id}; mirror removed");
                }
            }
        }
    }

    /// Remove a mirror whose owner withdrew it. Owned and unknown boards are
    /// left alone.
    async fn drop_mirror(&self, id: &BoardId) -> Result<(), CollabError> {
        match self.inner.registry.get(id).await {
            Some(handle) if !handle.is_owner() => {
                self.inner.registry.remove(id, false).await?;
                log::info!("Mirror {id} removed");
            }
            Some(_) => log::warn!("Ignoring removal notice for owned board {id}"),
            None => log::debug!("Removal notice for unknown board {id}"),
        }
        Ok(())
    }

    async fn board(&self, id: &BoardId) -> Result<BoardHandle, CollabError> {
        self.inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| CollabError::UnknownBoard(id.to_string()))
    }

    fn discovery(&self) -> Option<PeerSession> {
        self.inner
            .discovery
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn forget_discovery(&self, session: &PeerSession) {
        let mut slot = self
            .inner
            .discovery
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|s| s.id() == session.id()) {
            *slot = None;
            log::warn!("Lost connection to discovery server");
        }
    }

    fn announce(&self, event: Event, id: &BoardId) {
        match self.discovery() {
            Some(discovery) => {
                if let Err(e) = discovery.emit(event, id.to_string()) {
                    log::warn!("Could not send {event} for {id}: {e}");
                }
            }
            None => log::debug!("No discovery server; {event} for {id} not sent"),
        }
    }
}

/// Events a peer answers with `BOARD_ERROR` when they fail.
fn is_request(event: Event) -> bool {
    matches!(
        event,
        Event::BoardListen
            | Event::BoardUnlisten
            | Event::GetBoardData
            | Event::BoardPathUpdate
            | Event::BoardUndoUpdate
            | Event::BoardClearUpdate
    )
}
