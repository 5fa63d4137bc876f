//! Board actor: one task owns one board.
//!
//! The actor holds the board, its subscriber list and, for mirrors, the
//! session to the owner. Every command is handled to completion before the
//! next one is read, so the version check, the bump, the log edit and the
//! broadcast to subscribers happen as one step. Handling never awaits: all
//! sends go through non-blocking session queues.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use whiteboard_core::{Board, BoardId, BoardState, Operation, OperationMessage, Path, Role};

use crate::broadcast::{FanoutCounters, SubscriberList};
use crate::error::CollabError;
use crate::protocol::Event;
use crate::session::PeerSession;

/// Result of a version-gated proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Applied here; the board is now at `version`.
    Accepted { version: u64 },
    /// Stale base version; the board is at `current`. Nothing changed.
    Rejected { current: u64 },
    /// Mirror board: the proposal went to the owner.
    Forwarded,
}

/// Point-in-time view of a board, for front ends and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub id: BoardId,
    pub version: u64,
    pub paths: Vec<Path>,
    pub shared: bool,
    pub role: Role,
    pub subscribers: usize,
    /// Base version of the last proposal forwarded to the owner and not yet
    /// matched by a confirmation.
    pub pending: Option<u64>,
    /// Waiting for a full state after a rejected confirmation.
    pub resyncing: bool,
    /// Mirror has received at least one full state from its owner. Always
    /// true for owned boards.
    pub synced: bool,
    /// Forwarded proposals whose slot went to a different edit.
    pub lost_proposals: u64,
}

/// What a delete did on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deleted {
    pub role: Role,
    pub was_shared: bool,
    /// Sessions told about the deletion.
    pub notified: usize,
}

/// Commands accepted by a board actor.
pub enum BoardCmd {
    /// Local edit.
    Propose {
        op: Operation,
        base: u64,
        resp: oneshot::Sender<Result<Outcome, CollabError>>,
    },
    /// Edit proposed by a mirror over `from`.
    Proposal {
        from: PeerSession,
        op: Operation,
        base: u64,
        resp: oneshot::Sender<Outcome>,
    },
    /// Edit confirmed by the owner.
    Accepted {
        op: Operation,
        base: u64,
        resp: oneshot::Sender<Outcome>,
    },
    Subscribe {
        session: PeerSession,
        resp: oneshot::Sender<Result<(), CollabError>>,
    },
    Unsubscribe {
        session_id: Uuid,
        resp: oneshot::Sender<bool>,
    },
    /// Send the full state to one session.
    SendState {
        to: PeerSession,
        resp: oneshot::Sender<Result<(), CollabError>>,
    },
    /// Replace a mirror's state wholesale.
    LoadState {
        state: BoardState,
        resp: oneshot::Sender<Result<bool, CollabError>>,
    },
    SetShared {
        shared: bool,
        resp: oneshot::Sender<Result<bool, CollabError>>,
    },
    Snapshot {
        resp: oneshot::Sender<BoardSnapshot>,
    },
    /// Announce the deletion and stop the actor.
    Delete {
        notify_upstream: bool,
        resp: oneshot::Sender<Deleted>,
    },
}

pub struct BoardActor {
    board: Board,
    subscribers: SubscriberList,
    upstream: Option<PeerSession>,
    /// Last forwarded proposal: its base version and operation.
    pending: Option<(u64, Operation)>,
    resyncing: bool,
    synced: bool,
    lost_proposals: u64,
    rx: mpsc::Receiver<BoardCmd>,
}

impl BoardActor {
    /// Start the actor task and return its handle.
    pub fn spawn(
        board: Board,
        upstream: Option<PeerSession>,
        counters: Arc<FanoutCounters>,
        capacity: usize,
    ) -> BoardHandle {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = BoardHandle {
            id: board.id().clone(),
            role: board.role(),
            tx,
        };
        let actor = Self {
            synced: board.is_owner(),
            board,
            subscribers: SubscriberList::new(counters),
            upstream,
            pending: None,
            resyncing: false,
            lost_proposals: 0,
            rx,
        };
        tokio::spawn(actor.run());
        handle
    }

    async fn run(mut self) {
        log::debug!("Board actor {} started ({:?})", self.board.id(), self.board.role());
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                BoardCmd::Delete {
                    notify_upstream,
                    resp,
                } => {
                    let _ = resp.send(self.delete(notify_upstream));
                    break;
                }
                cmd => self.handle(cmd),
            }
        }
        log::debug!("Board actor {} stopped", self.board.id());
    }

    fn handle(&mut self, cmd: BoardCmd) {
        match cmd {
            BoardCmd::Propose { op, base, resp } => {
                let _ = resp.send(self.propose(op, base));
            }
            BoardCmd::Proposal {
                from,
                op,
                base,
                resp,
            } => {
                let _ = resp.send(self.proposal(&from, op, base));
            }
            BoardCmd::Accepted { op, base, resp } => {
                let _ = resp.send(self.accepted(op, base));
            }
            BoardCmd::Subscribe { session, resp } => {
                let _ = resp.send(self.subscribe(session));
            }
            BoardCmd::Unsubscribe { session_id, resp } => {
                let removed = self.subscribers.remove(session_id);
                if removed {
                    log::info!("Session {session_id} unsubscribed from {}", self.board.id());
                }
                let _ = resp.send(removed);
            }
            BoardCmd::SendState { to, resp } => {
                let _ = resp.send(self.send_state(&to));
            }
            BoardCmd::LoadState { state, resp } => {
                let _ = resp.send(self.load_state(state));
            }
            BoardCmd::SetShared { shared, resp } => {
                let _ = resp.send(self.set_shared(shared));
            }
            BoardCmd::Snapshot { resp } => {
                let _ = resp.send(self.snapshot());
            }
            BoardCmd::Delete { .. } => {}
        }
    }

    fn propose(&mut self, op: Operation, base: u64) -> Result<Outcome, CollabError> {
        if self.board.is_owner() {
            return Ok(self.apply_and_broadcast(op, base));
        }

        let current = self.board.version();
        if self.resyncing || base != current {
            log::debug!(
                "Mirror {}: not forwarding {} at {base}, local version {current}",
                self.board.id(),
                op.kind()
            );
            return Ok(Outcome::Rejected { current });
        }
        let upstream = self.upstream.as_ref().ok_or_else(|| {
            CollabError::Transport(format!("mirror {} has no owner session", self.board.id()))
        })?;
        let kind = op.kind();
        let msg = OperationMessage::new(self.board.id().clone(), base, op.clone());
        upstream.emit(Event::update(kind), msg.encode())?;
        self.pending = Some((base, op));
        Ok(Outcome::Forwarded)
    }

    fn proposal(&mut self, from: &PeerSession, op: Operation, base: u64) -> Outcome {
        if !self.board.is_owner() {
            log::warn!(
                "Proposal for mirror {} from {}; only the owner accepts edits",
                self.board.id(),
                from.remote()
            );
            let _ = from.emit(
                Event::BoardError,
                CollabError::NotOwner(self.board.id().clone()).to_string(),
            );
            return Outcome::Rejected {
                current: self.board.version(),
            };
        }

        let kind = op.kind();
        let outcome = self.apply_and_broadcast(op.clone(), base);
        // The proposer did not apply its own edit; it must hear about it even
        // when it is not subscribed.
        if matches!(outcome, Outcome::Accepted { .. }) && !self.subscribers.contains(from.id()) {
            let msg = OperationMessage::new(self.board.id().clone(), base, op);
            let _ = from.emit(Event::accepted(kind), msg.encode());
        }
        outcome
    }

    fn apply_and_broadcast(&mut self, op: Operation, base: u64) -> Outcome {
        if !self.board.apply(&op, base) {
            return Outcome::Rejected {
                current: self.board.version(),
            };
        }
        let version = self.board.version();
        log::debug!("Board {}: accepted {} at {base}, now {version}", self.board.id(), op.kind());

        if !self.subscribers.is_empty() {
            let kind = op.kind();
            let msg = OperationMessage::new(self.board.id().clone(), base, op);
            self.subscribers.broadcast(Event::accepted(kind), &msg.encode());
        }
        Outcome::Accepted { version }
    }

    fn accepted(&mut self, op: Operation, base: u64) -> Outcome {
        let current = self.board.version();
        if self.board.is_owner() {
            log::warn!("Ignoring confirmation for owned board {}", self.board.id());
            return Outcome::Rejected { current };
        }
        if self.resyncing {
            log::debug!("Mirror {}: dropping {} while resyncing", self.board.id(), op.kind());
            return Outcome::Rejected { current };
        }

        let kind = op.kind();
        if self.board.apply(&op, base) {
            self.settle_pending(&op, base);
            return Outcome::Accepted {
                version: self.board.version(),
            };
        }

        log::info!(
            "Mirror {}: {kind} at {base} does not fit version {current}, resyncing",
            self.board.id()
        );
        self.pending = None;
        self.request_resync();
        Outcome::Rejected { current }
    }

    /// Match a confirmation against the forwarded proposal. A confirmation
    /// at or past the proposal's base that carries another edit means the
    /// proposal lost the race at the owner and will never be applied.
    fn settle_pending(&mut self, op: &Operation, base: u64) {
        let Some((pending_base, pending_op)) = self.pending.take() else {
            return;
        };
        if pending_base == base && &pending_op == op {
            return;
        }
        if pending_base > base {
            self.pending = Some((pending_base, pending_op));
            return;
        }
        self.lost_proposals += 1;
        log::info!(
            "Mirror {}: {} proposed at {pending_base} was not accepted by the owner",
            self.board.id(),
            pending_op.kind()
        );
    }

    fn request_resync(&mut self) {
        let Some(upstream) = self.upstream.as_ref() else {
            log::warn!("Mirror {} cannot resync without an owner session", self.board.id());
            return;
        };
        match upstream.emit(Event::GetBoardData, self.board.id().to_string()) {
            Ok(()) => self.resyncing = true,
            Err(e) => log::warn!("Resync request for {} failed: {e}", self.board.id()),
        }
    }

    fn subscribe(&mut self, session: PeerSession) -> Result<(), CollabError> {
        if !self.board.is_owner() {
            return Err(CollabError::NotOwner(self.board.id().clone()));
        }
        if !self.board.is_shared() {
            return Err(CollabError::NotShared(self.board.id().clone()));
        }
        if self.subscribers.insert(session.clone()) {
            log::info!("Session {} subscribed to {}", session.id(), self.board.id());
        }
        // The first frame a new subscriber sees is the full state.
        if let Err(e) = session.emit(Event::BoardData, self.board.serialize()) {
            self.subscribers.remove(session.id());
            return Err(e);
        }
        Ok(())
    }

    fn send_state(&self, to: &PeerSession) -> Result<(), CollabError> {
        if !self.board.is_owner() {
            return Err(CollabError::NotOwner(self.board.id().clone()));
        }
        if !self.board.is_shared() {
            return Err(CollabError::NotShared(self.board.id().clone()));
        }
        to.emit(Event::BoardData, self.board.serialize())
    }

    fn load_state(&mut self, state: BoardState) -> Result<bool, CollabError> {
        if self.board.is_owner() {
            log::warn!("Ignoring full state for owned board {}", self.board.id());
            return Ok(false);
        }
        self.board.restore(state)?;
        self.pending = None;
        self.resyncing = false;
        self.synced = true;
        log::debug!("Mirror {} loaded at version {}", self.board.id(), self.board.version());
        Ok(true)
    }

    fn set_shared(&mut self, shared: bool) -> Result<bool, CollabError> {
        if !self.board.is_owner() {
            return Err(CollabError::NotOwner(self.board.id().clone()));
        }
        let changed = self.board.set_shared(shared);
        if changed && !shared {
            // Unsharing ends every subscription.
            self.subscribers
                .broadcast(Event::BoardDeleted, &self.board.id().to_string());
            self.subscribers.clear();
        }
        Ok(changed)
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            id: self.board.id().clone(),
            version: self.board.version(),
            paths: self.board.paths().to_vec(),
            shared: self.board.is_shared(),
            role: self.board.role(),
            subscribers: self.subscribers.len(),
            pending: self.pending.as_ref().map(|(base, _)| *base),
            resyncing: self.resyncing,
            synced: self.synced,
            lost_proposals: self.lost_proposals,
        }
    }

    fn delete(&mut self, notify_upstream: bool) -> Deleted {
        let id = self.board.id().to_string();
        let was_shared = self.board.is_shared();
        let mut notified = 0;

        if self.board.is_owner() && was_shared {
            notified = self.subscribers.broadcast(Event::BoardDeleted, &id);
        }
        self.subscribers.clear();

        if notify_upstream {
            if let Some(upstream) = self.upstream.as_ref() {
                if upstream.emit(Event::BoardUnlisten, id.as_str()).is_ok() {
                    notified += 1;
                }
            }
        }
        log::info!("Board {id} deleted ({notified} notified)");
        Deleted {
            role: self.board.role(),
            was_shared,
            notified,
        }
    }
}

/// Cloneable handle to a running board actor.
#[derive(Clone, Debug)]
pub struct BoardHandle {
    id: BoardId,
    role: Role,
    tx: mpsc::Sender<BoardCmd>,
}

impl BoardHandle {
    pub fn id(&self) -> &BoardId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BoardCmd,
    ) -> Result<T, CollabError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(make(resp))
            .await
            .map_err(|_| CollabError::ActorStopped(self.id.clone()))?;
        rx.await.map_err(|_| CollabError::ActorStopped(self.id.clone()))
    }

    pub async fn propose(&self, op: Operation, base: u64) -> Result<Outcome, CollabError> {
        self.request(|resp| BoardCmd::Propose { op, base, resp }).await?
    }

    pub async fn proposal(
        &self,
        from: PeerSession,
        op: Operation,
        base: u64,
    ) -> Result<Outcome, CollabError> {
        self.request(|resp| BoardCmd::Proposal {
            from,
            op,
            base,
            resp,
        })
        .await
    }

    pub async fn accepted(&self, op: Operation, base: u64) -> Result<Outcome, CollabError> {
        self.request(|resp| BoardCmd::Accepted { op, base, resp }).await
    }

    pub async fn subscribe(&self, session: PeerSession) -> Result<(), CollabError> {
        self.request(|resp| BoardCmd::Subscribe { session, resp }).await?
    }

    pub async fn unsubscribe(&self, session_id: Uuid) -> Result<bool, CollabError> {
        self.request(|resp| BoardCmd::Unsubscribe { session_id, resp })
            .await
    }

    pub async fn send_state(&self, to: PeerSession) -> Result<(), CollabError> {
        self.request(|resp| BoardCmd::SendState { to, resp }).await?
    }

    pub async fn load_state(&self, state: BoardState) -> Result<bool, CollabError> {
        self.request(|resp| BoardCmd::LoadState { state, resp }).await?
    }

    pub async fn set_shared(&self, shared: bool) -> Result<bool, CollabError> {
        self.request(|resp| BoardCmd::SetShared { shared, resp }).await?
    }

    pub async fn snapshot(&self) -> Result<BoardSnapshot, CollabError> {
        self.request(|resp| BoardCmd::Snapshot { resp }).await
    }

    pub async fn delete(&self, notify_upstream: bool) -> Result<Deleted, CollabError> {
        self.request(|resp| BoardCmd::Delete {
            notify_upstream,
            resp,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use whiteboard_core::{Color, PeerAddr, Point};

    fn id() -> BoardId {
        BoardId::new(PeerAddr::new("h", 1), "b")
    }

    fn path(n: i32) -> Path {
        Path::new(Color::RED, 1, vec![Point::new(n, n)])
    }

    fn owner() -> BoardHandle {
        BoardActor::spawn(Board::new_local(id()), None, Arc::new(FanoutCounters::new()), 8)
    }

    fn mirror(upstream: PeerSession) -> BoardHandle {
        BoardActor::spawn(
            Board::new_mirror(id()),
            Some(upstream),
            Arc::new(FanoutCounters::new()),
            8,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_owner_accepts_and_rejects() {
        let board = owner();
        let out = board.propose(Operation::AddPath(path(1)), 0).await.unwrap();
        assert_eq!(out, Outcome::Accepted { version: 1 });

        let out = board.propose(Operation::Undo, 0).await.unwrap();
        assert_eq!(out, Outcome::Rejected { current: 1 });

        let snap = board.snapshot().await.unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.paths, vec![path(1)]);
    }

    #[tokio::test]
    async fn test_subscribe_requires_shared() {
        let board = owner();
        let (session, mut rx) = PeerSession::new("m", 8);

        let err = board.subscribe(session.clone()).await.unwrap_err();
        assert!(matches!(err, CollabError::NotShared(_)));

        board.set_shared(true).await.unwrap();
        board.propose(Operation::AddPath(path(1)), 0).await.unwrap();
        board.subscribe(session.clone()).await.unwrap();
        board.subscribe(session.clone()).await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames[0].event(), Some(Event::BoardData));
        assert_eq!(frames[0].payload, "h:1:b%1%#ff0000,1,1 1");
        assert_eq!(board.snapshot().await.unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn test_accepted_ops_broadcast_with_base_version() {
        let board = owner();
        board.set_shared(true).await.unwrap();
        let (session, mut rx) = PeerSession::new("m", 8);
        board.subscribe(session).await.unwrap();
        drain(&mut rx);

        board.propose(Operation::AddPath(path(1)), 0).await.unwrap();
        board.propose(Operation::Clear, 0).await.unwrap();
        board.propose(Operation::Clear, 1).await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event(), Some(Event::BoardPathAccepted));
        assert_eq!(frames[0].payload, "h:1:b%0%#ff0000,1,1 1");
        assert_eq!(frames[1].event(), Some(Event::BoardClearAccepted));
        assert_eq!(frames[1].payload, "h:1:b%1%");
    }

    #[tokio::test]
    async fn test_unshare_notifies_and_drops_subscribers() {
        let board = owner();
        board.set_shared(true).await.unwrap();
        let (session, mut rx) = PeerSession::new("m", 8);
        board.subscribe(session).await.unwrap();
        drain(&mut rx);

        assert!(board.set_shared(false).await.unwrap());
        assert!(!board.set_shared(false).await.unwrap());

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event(), Some(Event::BoardDeleted));
        assert_eq!(board.snapshot().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn test_mirror_forwards_instead_of_applying() {
        let (upstream, mut up_rx) = PeerSession::new("owner", 8);
        let board = mirror(upstream);

        let out = board.propose(Operation::AddPath(path(2)), 0).await.unwrap();
        assert_eq!(out, Outcome::Forwarded);
        let snap = board.snapshot().await.unwrap();
        assert_eq!(snap.version, 0);
        assert_eq!(snap.pending, Some(0));

        let frames = drain(&mut up_rx);
        assert_eq!(frames[0].event(), Some(Event::BoardPathUpdate));
        assert_eq!(frames[0].payload, "h:1:b%0%#ff0000,1,2 2");

        // Stale locally: not forwarded at all.
        let out = board.propose(Operation::Undo, 3).await.unwrap();
        assert_eq!(out, Outcome::Rejected { current: 0 });
        assert!(drain(&mut up_rx).is_empty());
    }

    #[tokio::test]
    async fn test_mirror_applies_confirmation_and_clears_pending() {
        let (upstream, _up_rx) = PeerSession::new("owner", 8);
        let board = mirror(upstream);
        board.propose(Operation::AddPath(path(2)), 0).await.unwrap();

        let out = board.accepted(Operation::AddPath(path(2)), 0).await.unwrap();
        assert_eq!(out, Outcome::Accepted { version: 1 });
        let snap = board.snapshot().await.unwrap();
        assert_eq!(snap.paths, vec![path(2)]);
        assert_eq!(snap.pending, None);
    }

    #[tokio::test]
    async fn test_mirror_counts_proposal_lost_to_other_edit() {
        let (upstream, _up_rx) = PeerSession::new("owner", 8);
        let board = mirror(upstream);
        board.propose(Operation::AddPath(path(2)), 0).await.unwrap();

        // Someone else's edit took version 0 at the owner.
        let out = board.accepted(Operation::AddPath(path(9)), 0).await.unwrap();
        assert_eq!(out, Outcome::Accepted { version: 1 });
        let snap = board.snapshot().await.unwrap();
        assert_eq!(snap.pending, None);
        assert_eq!(snap.lost_proposals, 1);
        assert_eq!(snap.paths, vec![path(9)]);
    }

    #[tokio::test]
    async fn test_mirror_synced_after_first_state() {
        let (upstream, _up_rx) = PeerSession::new("owner", 8);
        let board = mirror(upstream);
        assert!(!board.snapshot().await.unwrap().synced);
        assert!(owner().snapshot().await.unwrap().synced);

        let state = BoardState {
            id: id(),
            version: 2,
            paths: vec![],
        };
        board.load_state(state).await.unwrap();
        assert!(board.snapshot().await.unwrap().synced);
    }

    #[tokio::test]
    async fn test_mirror_resyncs_on_gap() {
        let (upstream, mut up_rx) = PeerSession::new("owner", 8);
        let board = mirror(upstream);

        let out = board.accepted(Operation::Undo, 4).await.unwrap();
        assert_eq!(out, Outcome::Rejected { current: 0 });
        let frames = drain(&mut up_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event(), Some(Event::GetBoardData));
        assert_eq!(frames[0].payload, "h:1:b");

        // Further confirmations are dropped until the state arrives.
        board.accepted(Operation::Clear, 0).await.unwrap();
        assert!(drain(&mut up_rx).is_empty());
        assert!(board.snapshot().await.unwrap().resyncing);

        let state = BoardState {
            id: id(),
            version: 5,
            paths: vec![path(3)],
        };
        assert!(board.load_state(state).await.unwrap());
        let snap = board.snapshot().await.unwrap();
        assert_eq!(snap.version, 5);
        assert_eq!(snap.paths, vec![path(3)]);
        assert!(!snap.resyncing);
    }

    #[tokio::test]
    async fn test_remote_proposal_reaches_unsubscribed_proposer() {
        let board = owner();
        let (proposer, mut rx) = PeerSession::new("m", 8);
        let out = board
            .proposal(proposer, Operation::AddPath(path(1)), 0)
            .await
            .unwrap();
        assert_eq!(out, Outcome::Accepted { version: 1 });

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event(), Some(Event::BoardPathAccepted));
    }

    #[tokio::test]
    async fn test_delete_stops_actor() {
        let board = owner();
        board.set_shared(true).await.unwrap();
        let (a, mut rx_a) = PeerSession::new("a", 8);
        board.subscribe(a).await.unwrap();
        drain(&mut rx_a);

        let deleted = board.delete(true).await.unwrap();
        assert_eq!(
            deleted,
            Deleted {
                role: Role::Owner,
                was_shared: true,
                notified: 1
            }
        );
        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event(), Some(Event::BoardDeleted));

        let err = board.snapshot().await.unwrap_err();
        assert!(matches!(err, CollabError::ActorStopped(_)));
    }

    #[tokio::test]
    async fn test_mirror_delete_unlistens_upstream() {
        let (upstream, mut up_rx) = PeerSession::new("owner", 8);
        let board = mirror(upstream);
        let deleted = board.delete(true).await.unwrap();
        assert_eq!(deleted.role, Role::Mirror);

        let frames = drain(&mut up_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event(), Some(Event::BoardUnlisten));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_broadcast_after_unsubscribe_acknowledged() {
        let board = owner();
        board.set_shared(true).await.unwrap();
        let (session, mut rx) = PeerSession::new("m", 4096);
        let session_id = session.id();
        board.subscribe(session).await.unwrap();
        drain(&mut rx);

        let mut writers = Vec::new();
        for _ in 0..4 {
            let board = board.clone();
            writers.push(tokio::spawn(async move {
                let mut accepted = 0u64;
                for _ in 0..50 {
                    let base = board.snapshot().await.unwrap().version;
                    if let Outcome::Accepted { .. } = board.propose(Operation::Undo, base).await.unwrap() {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        assert!(board.unsubscribe(session_id).await.unwrap());
        let delivered = drain(&mut rx);

        let mut accepted = 0;
        for writer in writers {
            accepted += writer.await.unwrap();
        }
        assert!(drain(&mut rx).is_empty());
        assert_eq!(board.snapshot().await.unwrap().version, accepted);
        // What arrived before the removal is gap-free and in version order.
        for (i, frame) in delivered.iter().enumerate() {
            assert_eq!(frame.event(), Some(Event::BoardUndoAccepted));
            assert_eq!(frame.payload, format!("h:1:b%{i}%"));
        }
    }
}

