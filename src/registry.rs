use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::connection_id::ConnectionId;
use crate::session::Session;

/// The mapping from connection id to live session. This is the enforcement point for the
///  "at most one session per id" invariant: [SessionRegistry::insert] is insert-if-absent,
///  and it is the sole serialization point for racing first-contact packets.
///
/// Insertion order is kept explicitly so that iteration (and with it writable fan-out) is
///  deterministic within a process.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: FxHashMap<ConnectionId, Arc<dyn Session>>,
    insertion_order: Vec<ConnectionId>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        Default::default()
    }

    /// Total lookup: a missing id is `None`, never an error.
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<Arc<dyn Session>> {
        self.sessions.get(connection_id).cloned()
    }

    /// Inserts only if no entry exists for this id. Returns false - leaving the registry
    ///  untouched - if someone already owns the id.
    pub fn insert(&mut self, connection_id: ConnectionId, session: Arc<dyn Session>) -> bool {
        if self.sessions.contains_key(&connection_id) {
            return false;
        }
        self.insertion_order.push(connection_id.clone());
        self.sessions.insert(connection_id, session);
        true
    }

    /// Idempotent: removing an absent id is a no-op.
    pub fn remove(&mut self, connection_id: &ConnectionId) {
        if self.sessions.remove(connection_id).is_some() {
            self.insertion_order.retain(|id| id != connection_id);
        }
    }

    /// Sessions in insertion order.
    pub fn sessions(&self) -> impl Iterator<Item = &Arc<dyn Session>> {
        self.insertion_order.iter()
            .filter_map(|id| self.sessions.get(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
