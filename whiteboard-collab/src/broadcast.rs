//! Ordered fan-out to a board's subscribers.
//!
//! Each owner board keeps its subscribers in subscription order. A broadcast
//! emits to every subscriber in that order; a subscriber whose queue refuses
//! the frame is removed on the spot, so it receives nothing later.
//!
//! Counters are shared by every board of an engine and updated with atomics,
//! so reading them never goes through a board actor.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::Event;
use crate::session::PeerSession;

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_subscribers: usize,
}

/// Lock-free counters behind [`BroadcastStats`].
#[derive(Debug, Default)]
pub struct FanoutCounters {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    active_subscribers: AtomicUsize,
}

impl FanoutCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
        }
    }
}

/// Subscriber set of one board. No duplicates; iteration in subscription order.
pub struct SubscriberList {
    sessions: Vec<PeerSession>,
    counters: Arc<FanoutCounters>,
}

impl SubscriberList {
    pub fn new(counters: Arc<FanoutCounters>) -> Self {
        Self {
            sessions: Vec::new(),
            counters,
        }
    }

    /// Add a session. Returns false if it is already subscribed.
    pub fn insert(&mut self, session: PeerSession) -> bool {
        if self.contains(session.id()) {
            return false;
        }
        self.sessions.push(session);
        self.counters.active_subscribers.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn remove(&mut self, session_id: Uuid) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id() != session_id);
        let removed = before - self.sessions.len();
        self.counters.active_subscribers.fetch_sub(removed, Ordering::Relaxed);
        removed > 0
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.iter().any(|s| s.id() == session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(PeerSession::id).collect()
    }

    /// Emit to every subscriber in order. Returns how many accepted the frame.
    pub fn broadcast(&mut self, event: Event, payload: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for session in &self.sessions {
            match session.emit(event, payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!("Removing subscriber {}: {e}", session.id());
                    failed.push(session.id());
                }
            }
        }
        for id in &failed {
            self.remove(*id);
        }
        self.counters
            .messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .messages_dropped
            .fetch_add(failed.len() as u64, Ordering::Relaxed);
        delivered
    }

    /// Remove every subscriber.
    pub fn clear(&mut self) {
        self.counters
            .active_subscribers
            .fetch_sub(self.sessions.len(), Ordering::Relaxed);
        self.sessions.clear();
    }
}

impl Drop for SubscriberList {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> (SubscriberList, Arc<FanoutCounters>) {
        let counters = Arc::new(FanoutCounters::new());
        (SubscriberList::new(counters.clone()), counters)
    }

    #[tokio::test]
    async fn test_broadcast_in_subscription_order() {
        let (mut subs, counters) = list();
        let (a, mut rx_a) = PeerSession::new("a", 8);
        let (b, mut rx_b) = PeerSession::new("b", 8);
        assert!(subs.insert(a.clone()));
        assert!(subs.insert(b.clone()));
        assert_eq!(subs.ids(), vec![a.id(), b.id()]);

        assert_eq!(subs.broadcast(Event::BoardPathAccepted, "h:1:b%0%#000000,1,0 0"), 2);
        assert_eq!(rx_a.recv().await.unwrap().payload, "h:1:b%0%#000000,1,0 0");
        assert_eq!(rx_b.recv().await.unwrap().payload, "h:1:b%0%#000000,1,0 0");

        let stats = counters.snapshot();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_dropped, 0);
        assert_eq!(stats.active_subscribers, 2);
    }

    #[test]
    fn test_no_duplicate_subscribers() {
        let (mut subs, counters) = list();
        let (a, _rx) = PeerSession::new("a", 8);
        assert!(subs.insert(a.clone()));
        assert!(!subs.insert(a.clone()));
        assert_eq!(subs.len(), 1);
        assert_eq!(counters.snapshot().active_subscribers, 1);
    }

    #[tokio::test]
    async fn test_failed_subscriber_is_removed() {
        let (mut subs, counters) = list();
        let (alive, mut rx_alive) = PeerSession::new("alive", 8);
        let (dead, _rx_dead) = PeerSession::new("dead", 8);
        subs.insert(dead.clone());
        subs.insert(alive.clone());
        dead.close().await;

        assert_eq!(subs.broadcast(Event::BoardDeleted, "h:1:b"), 1);
        assert!(!subs.contains(dead.id()));
        assert!(subs.contains(alive.id()));
        assert_eq!(rx_alive.recv().await.unwrap().payload, "h:1:b");

        // The removed session gets nothing afterwards.
        assert_eq!(subs.broadcast(Event::BoardDeleted, "h:1:c"), 1);
        let stats = counters.snapshot();
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.active_subscribers, 1);
    }

    #[test]
    fn test_drop_releases_subscriber_count() {
        let (mut subs, counters) = list();
        let (a, _ra) = PeerSession::new("a", 8);
        let (b, _rb) = PeerSession::new("b", 8);
        subs.insert(a);
        subs.insert(b.clone());
        assert!(subs.remove(b.id()));
        assert!(!subs.remove(b.id()));
        assert_eq!(counters.snapshot().active_subscribers, 1);

        drop(subs);
        assert_eq!(counters.snapshot().active_subscribers, 0);
    }
}
