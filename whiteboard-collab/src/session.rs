//! One logical connection to another peer or to the discovery server.
//!
//! A session exposes exactly two capabilities to the rest of the crate:
//! `emit(event, payload)` and `on(event, handler)`. Outgoing frames go into a
//! bounded queue drained by the transport task, so emitting never waits on the
//! network. A full or closed queue is a delivery failure.
//!
//! Each session owns its handler table; handlers are dropped with it.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::CollabError;
use crate::protocol::{Event, Frame};

/// Event handler. Receives the session the event arrived on and its payload.
pub type Handler = Arc<dyn Fn(PeerSession, String) -> BoxFuture<'static, ()> + Send + Sync>;

type CloseHandler = Box<dyn FnOnce(PeerSession) -> BoxFuture<'static, ()> + Send>;

struct SessionInner {
    id: Uuid,
    remote: String,
    outgoing: Mutex<Option<mpsc::Sender<Frame>>>,
    handlers: RwLock<HashMap<Event, Handler>>,
    on_close: Mutex<Option<CloseHandler>>,
}

/// Cheap, cloneable handle to a connection.
#[derive(Clone)]
pub struct PeerSession {
    inner: Arc<SessionInner>,
}

impl PeerSession {
    /// Create a session and the receiving end of its outgoing queue.
    ///
    /// The transport owns the receiver and writes every frame it yields to the
    /// connection. When the session is closed the receiver ends.
    pub fn new(remote: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                remote: remote.into(),
                outgoing: Mutex::new(Some(tx)),
                handlers: RwLock::new(HashMap::new()),
                on_close: Mutex::new(None),
            }),
        };
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Human-readable name of the other end, for logs.
    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    /// Queue a frame for delivery. Never blocks.
    pub fn emit(&self, event: Event, payload: impl Into<String>) -> Result<(), CollabError> {
        let outgoing = self
            .inner
            .outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = outgoing.as_ref() else {
            return Err(CollabError::PeerUnreachable(self.id()));
        };
        tx.try_send(Frame::new(event, payload)).map_err(|e| {
            log::warn!("Dropping {event} to {} ({}): {e}", self.remote(), self.id());
            CollabError::PeerUnreachable(self.id())
        })
    }

    /// Register the handler for `event`, replacing any earlier one.
    pub fn on<F, Fut>(&self, event: Event, handler: F)
    where
        F: Fn(PeerSession, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |session, payload| -> BoxFuture<'static, ()> {
            Box::pin(handler(session, payload))
        });
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(event, handler);
    }

    /// Register the hook run once when the session closes.
    pub fn on_close<F, Fut>(&self, handler: F)
    where
        F: FnOnce(PeerSession) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: CloseHandler =
            Box::new(move |session| -> BoxFuture<'static, ()> { Box::pin(handler(session)) });
        *self
            .inner
            .on_close
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    pub fn has_handler(&self, event: Event) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&event)
    }

    /// Run the handler registered for an inbound frame.
    ///
    /// Frames are dispatched one at a time by the transport task, which keeps
    /// per-connection ordering.
    pub async fn dispatch(&self, frame: Frame) {
        let Some(event) = frame.event() else {
            log::debug!("Ignoring unknown event {:?} from {}", frame.event, self.remote());
            return;
        };
        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&event)
            .cloned();
        match handler {
            Some(handler) => handler(self.clone(), frame.payload).await,
            None => log::debug!("No handler for {event} on session {}", self.id()),
        }
    }

    /// Close the session: stop accepting frames, drop the handler table and
    /// run the close hook. Idempotent.
    pub async fn close(&self) {
        let was_open = self
            .inner
            .outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some();
        if was_open {
            log::debug!("Session {} to {} closed", self.id(), self.remote());
        }
        let hook = self
            .inner
            .on_close
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        if let Some(hook) = hook {
            hook(self.clone()).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl PartialEq for PeerSession {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for PeerSession {}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id())
            .field("remote", &self.remote())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_emit_queues_frame() {
        let (session, mut rx) = PeerSession::new("test", 4);
        session.emit(Event::BoardListen, "h:1:b").unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event(), Some(Event::BoardListen));
        assert_eq!(frame.payload, "h:1:b");
    }

    #[tokio::test]
    async fn test_emit_fails_when_queue_full() {
        let (session, _rx) = PeerSession::new("slow", 1);
        session.emit(Event::BoardError, "one").unwrap();
        let err = session.emit(Event::BoardError, "two").unwrap_err();
        assert!(matches!(err, CollabError::PeerUnreachable(id) if id == session.id()));
    }

    #[tokio::test]
    async fn test_emit_fails_after_close() {
        let (session, mut rx) = PeerSession::new("gone", 4);
        session.close().await;
        assert!(session.is_closed());
        assert!(session.emit(Event::BoardError, "x").is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        let (session, _rx) = PeerSession::new("test", 4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on(Event::BoardDeleted, move |_, payload| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
            }
        });

        session.dispatch(Frame::new(Event::BoardDeleted, "h:1:b")).await;
        session.dispatch(Frame::new(Event::BoardData, "ignored")).await;
        session
            .dispatch(Frame {
                event: "NOT_AN_EVENT".into(),
                payload: String::new(),
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec!["h:1:b".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_receives_its_session() {
        let (session, mut rx) = PeerSession::new("echo", 4);
        session.on(Event::GetBoardData, |session, payload| async move {
            let _ = session.emit(Event::BoardData, format!("{payload}%0%"));
        });

        session.dispatch(Frame::new(Event::GetBoardData, "h:1:b")).await;
        assert_eq!(rx.recv().await.unwrap().payload, "h:1:b%0%");
    }

    #[tokio::test]
    async fn test_close_hook_runs_once() {
        let (session, _rx) = PeerSession::new("test", 4);
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        session.on_close(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.on(Event::BoardError, |_, _| async {});

        session.close().await;
        session.close().await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!session.has_handler(Event::BoardError));
    }

    #[test]
    fn test_sessions_compare_by_id() {
        let (a, _ra) = PeerSession::new("a", 1);
        let (b, _rb) = PeerSession::new("a", 1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
