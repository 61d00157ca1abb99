//! The presence registry: the single source of truth for "is this user
//! reachable right now".
//!
//! One entry per user, last connection wins; multi-device is deliberately
//! not modeled. The registry is owned by the composition root and handed
//! to everything that needs it, so it can be exercised in isolation and
//! swapped for a distributed implementation later.
//!
//! The map is in-memory and per-process: a recipient connected to a
//! different instance of this server is invisible to lookups here. That
//! is a known scalability ceiling, accepted on purpose.
//!
//! Durable status writes (`users.status` / `users.last_seen`) are
//! best-effort bookkeeping for "last seen" display; reachability for
//! delivery never depends on them succeeding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use palaver_shared::protocol::ServerEvent;
use palaver_shared::UserId;
use palaver_store::Database;

/// Identifies one physical connection, so a stale socket closing late
/// cannot evict the connection that replaced it.
pub type ConnectionId = Uuid;

/// Sending half of a connection's push channel. Sends are fire-and-forget;
/// the forward task owns the socket.
pub type PushSender = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    id: ConnectionId,
    tx: PushSender,
}

pub struct PresenceRegistry {
    connections: RwLock<HashMap<UserId, Connection>>,
    db: Arc<Mutex<Database>>,
}

impl PresenceRegistry {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            db,
        }
    }

    /// Register a connection for `user`, replacing any prior one.
    ///
    /// Flips the durable status to online (best-effort) and broadcasts the
    /// full online list to every connection, the newcomer included.
    pub fn register(&self, user: UserId, connection_id: ConnectionId, tx: PushSender) {
        let replaced = {
            let mut connections = self.connections.write().expect("presence lock poisoned");
            connections
                .insert(user, Connection { id: connection_id, tx })
                .is_some()
        };

        debug!(user = %user, connection = %connection_id, replaced, "user connected");

        if let Err(e) = self.db.lock().expect("db lock poisoned").set_status_online(user) {
            warn!(user = %user, error = %e, "failed to persist online status");
        }

        let users = self.snapshot_online_users();
        self.broadcast(ServerEvent::OnlineUsers { users });
    }

    /// Drop the mapping for `user`, but only if it still belongs to
    /// `connection_id`. A lingering old socket closing after a reconnect
    /// must not evict the fresh registration.
    ///
    /// Returns whether the user actually went offline.
    pub fn unregister(&self, user: UserId, connection_id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.write().expect("presence lock poisoned");
            match connections.get(&user) {
                Some(current) if current.id == connection_id => {
                    connections.remove(&user);
                    true
                }
                _ => false,
            }
        };

        if !removed {
            debug!(user = %user, connection = %connection_id, "stale disconnect ignored");
            return false;
        }

        debug!(user = %user, connection = %connection_id, "user disconnected");

        if let Err(e) = self
            .db
            .lock()
            .expect("db lock poisoned")
            .set_status_offline(user, Utc::now())
        {
            warn!(user = %user, error = %e, "failed to persist offline status");
        }

        // A single notice, not a full list rebroadcast, to bound fanout.
        self.broadcast(ServerEvent::UserOffline { user_id: user });
        true
    }

    /// Pure read: the push sender for `user`, if connected.
    pub fn lookup(&self, user: UserId) -> Option<PushSender> {
        self.connections
            .read()
            .expect("presence lock poisoned")
            .get(&user)
            .map(|c| c.tx.clone())
    }

    /// Everyone with a live connection right now. Answers the explicit
    /// "who is online" pull from a freshly-connected client.
    pub fn snapshot_online_users(&self) -> Vec<UserId> {
        self.connections
            .read()
            .expect("presence lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Push an event to `user` if reachable. An offline target is a
    /// silent no-op by design; a closed channel is logged and ignored
    /// (the transport owns its own teardown).
    pub fn send_to(&self, user: UserId, event: ServerEvent) -> bool {
        match self.lookup(user) {
            Some(tx) => {
                if let Err(e) = tx.send(event) {
                    warn!(user = %user, error = %e, "push send failed");
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// Push an event to every live connection.
    pub fn broadcast(&self, event: ServerEvent) {
        let targets: Vec<(UserId, PushSender)> = {
            let connections = self.connections.read().expect("presence lock poisoned");
            connections
                .iter()
                .map(|(user, c)| (*user, c.tx.clone()))
                .collect()
        };

        for (user, tx) in targets {
            if let Err(e) = tx.send(event.clone()) {
                warn!(user = %user, error = %e, "broadcast send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn registry() -> (PresenceRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (PresenceRegistry::new(Arc::new(Mutex::new(db))), dir)
    }

    #[test]
    fn lookup_finds_registered_user() {
        let (registry, _dir) = registry();
        let user = UserId::new();
        let (tx, _rx) = unbounded_channel();

        assert!(registry.lookup(user).is_none());
        registry.register(user, Uuid::new_v4(), tx);
        assert!(registry.lookup(user).is_some());
        assert_eq!(registry.snapshot_online_users(), vec![user]);
    }

    #[test]
    fn reconnect_overwrites_and_stale_close_is_ignored() {
        let (registry, _dir) = registry();
        let user = UserId::new();

        let old_conn = Uuid::new_v4();
        let (old_tx, _old_rx) = unbounded_channel();
        registry.register(user, old_conn, old_tx);

        // Network blip: a new connection registers before the old one
        // finishes closing.
        let new_conn = Uuid::new_v4();
        let (new_tx, mut new_rx) = unbounded_channel();
        registry.register(user, new_conn, new_tx);

        // The old connection's close arrives late; the user stays online.
        assert!(!registry.unregister(user, old_conn));
        assert!(registry.lookup(user).is_some());

        // No user-offline notice reached the live connection.
        while let Ok(event) = new_rx.try_recv() {
            assert!(!matches!(event, ServerEvent::UserOffline { .. }));
        }

        // The real close does take the user offline.
        assert!(registry.unregister(user, new_conn));
        assert!(registry.lookup(user).is_none());
    }

    #[test]
    fn register_broadcasts_online_list_to_everyone() {
        let (registry, _dir) = registry();
        let alice = UserId::new();
        let bob = UserId::new();

        let (alice_tx, mut alice_rx) = unbounded_channel();
        registry.register(alice, Uuid::new_v4(), alice_tx);

        let (bob_tx, _bob_rx) = unbounded_channel();
        registry.register(bob, Uuid::new_v4(), bob_tx);

        let mut latest_online = None;
        while let Ok(event) = alice_rx.try_recv() {
            if let ServerEvent::OnlineUsers { users } = event {
                latest_online = Some(users);
            }
        }
        let mut users = latest_online.expect("alice saw an online-users broadcast");
        users.sort();
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(users, expected);
    }

    #[test]
    fn unregister_broadcasts_single_offline_notice() {
        let (registry, _dir) = registry();
        let alice = UserId::new();
        let bob = UserId::new();

        let (alice_tx, mut alice_rx) = unbounded_channel();
        registry.register(alice, Uuid::new_v4(), alice_tx);

        let bob_conn = Uuid::new_v4();
        let (bob_tx, _bob_rx) = unbounded_channel();
        registry.register(bob, bob_conn, bob_tx);

        registry.unregister(bob, bob_conn);

        let mut offline_notices = 0;
        while let Ok(event) = alice_rx.try_recv() {
            if let ServerEvent::UserOffline { user_id } = event {
                assert_eq!(user_id, bob);
                offline_notices += 1;
            }
        }
        assert_eq!(offline_notices, 1);
    }

    #[test]
    fn send_to_offline_user_is_a_silent_noop() {
        let (registry, _dir) = registry();

        let delivered = registry.send_to(
            UserId::new(),
            ServerEvent::Typing { from: UserId::new() },
        );
        assert!(!delivered);
    }
}
