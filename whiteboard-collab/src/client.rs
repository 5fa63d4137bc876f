//! Outbound WebSocket connections to other peers and the discovery server.

use futures_util::future::BoxFuture;
use whiteboard_core::PeerAddr;

use crate::engine::{Connector, SessionSetup};
use crate::error::CollabError;
use crate::server::drive_connection;
use crate::session::PeerSession;

/// [`Connector`] that dials `ws://host:port`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    session_capacity: usize,
}

impl WsConnector {
    pub fn new(session_capacity: usize) -> Self {
        Self { session_capacity }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Connector for WsConnector {
    fn connect<'a>(
        &'a self,
        addr: &'a PeerAddr,
        setup: SessionSetup,
    ) -> BoxFuture<'a, Result<PeerSession, CollabError>> {
        Box::pin(async move {
            let url = addr.ws_url();
            let (ws, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| CollabError::Transport(format!("connect {url}: {e}")))?;

            let (session, outgoing) = PeerSession::new(addr.to_string(), self.session_capacity);
            // Handlers must be in place before the first inbound frame.
            setup(&session);
            tokio::spawn(drive_connection(ws, session.clone(), outgoing, None));

            log::info!("Connected to {url} (session {})", session.id());
            Ok(session)
        })
    }
}
