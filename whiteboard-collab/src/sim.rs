//! In-process network for tests and demos.
//!
//! Engines register under their advertised address. Connecting creates a
//! session pair and two pump tasks that dispatch each side's outgoing frames
//! on the other side, in order. Closing either session closes its partner.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use whiteboard_core::PeerAddr;

use crate::engine::{Connector, EngineConfig, ReplicationEngine, SessionSetup, WeakEngine};
use crate::error::CollabError;
use crate::protocol::Frame;
use crate::session::PeerSession;

/// Shared broker routing connections between engines.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<PeerAddr, WeakEngine>>>,
    session_capacity: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_capacity(EngineConfig::default().session_capacity)
    }

    pub fn with_capacity(session_capacity: usize) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            session_capacity,
        }
    }

    /// Create an engine at `addr` that connects through this network.
    pub fn spawn_peer(&self, addr: PeerAddr) -> ReplicationEngine {
        let engine = ReplicationEngine::new(
            addr,
            Arc::new(self.clone()),
            EngineConfig {
                session_capacity: self.session_capacity.max(1),
                ..EngineConfig::default()
            },
        );
        self.register(&engine);
        engine
    }

    /// Make `engine` reachable at its local address.
    pub fn register(&self, engine: &ReplicationEngine) {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(engine.local_addr().clone(), engine.downgrade());
    }

    fn lookup(&self, addr: &PeerAddr) -> Option<ReplicationEngine> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(addr)
            .and_then(WeakEngine::upgrade)
    }

    /// Connect a bare session to the engine at `addr`, with no engine on the
    /// near side. Used to play a peer or discovery server by hand.
    pub fn raw_session(
        &self,
        addr: &PeerAddr,
    ) -> Result<(PeerSession, mpsc::Receiver<Frame>), CollabError> {
        let remote = self
            .lookup(addr)
            .ok_or_else(|| CollabError::Transport(format!("no peer at {addr}")))?;
        let capacity = self.session_capacity.max(1);
        let (near, near_rx) = PeerSession::new(addr.to_string(), capacity);
        let (far, far_rx) = PeerSession::new("memory", capacity);
        remote.attach(&far);
        tokio::spawn(pump(near_rx, far));
        Ok((near, far_rx))
    }
}

impl Connector for MemoryNetwork {
    fn connect<'a>(
        &'a self,
        addr: &'a PeerAddr,
        setup: SessionSetup,
    ) -> BoxFuture<'a, Result<PeerSession, CollabError>> {
        Box::pin(async move {
            let remote = self
                .lookup(addr)
                .ok_or_else(|| CollabError::Transport(format!("no peer at {addr}")))?;
            let capacity = self.session_capacity.max(1);
            let (near, near_rx) = PeerSession::new(addr.to_string(), capacity);
            let (far, far_rx) = PeerSession::new("memory", capacity);
            setup(&near);
            remote.attach(&far);
            tokio::spawn(pump(near_rx, far.clone()));
            tokio::spawn(pump(far_rx, near.clone()));
            Ok(near)
        })
    }
}

/// Deliver frames queued on one side to the other, then close the other side.
async fn pump(mut rx: mpsc::Receiver<Frame>, to: PeerSession) {
    while let Some(frame) = rx.recv().await {
        to.dispatch(frame).await;
    }
    to.close().await;
}
