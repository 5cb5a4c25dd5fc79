use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};


/// Identifier handed out by a server at key exchange time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Random version 4 UUID text.
    pub fn generate() -> SessionId {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex = hex::encode(bytes);
        SessionId(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        SessionId(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side map from session id to session state. The lock is only held
/// for the map operation; callers work on the returned `Arc` afterwards.
pub struct SessionTable<T> {
    sessions: Mutex<HashMap<SessionId, Arc<T>>>,
}

impl<T> Default for SessionTable<T> {
    fn default() -> Self {
        SessionTable {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> SessionTable<T> {
    pub fn new() -> SessionTable<T> {
        SessionTable::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<T>>> {
        // a panic elsewhere cannot leave the map itself half-updated
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, state: T) -> SessionId {
        let mut sessions = self.lock();
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        sessions.insert(id.clone(), Arc::new(state));
        id
    }

    pub fn insert_with_id(&self, id: SessionId, state: T) {
        self.lock().insert(id, Arc::new(state));
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<T>> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<T>> {
        self.lock().remove(id)
    }

    /// Drops every session whose state fails `keep`. Returns how many went.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, state| keep(state));
        before - sessions.len()
    }

    /// Removes the session with the smallest `key`, if there is one.
    pub fn remove_min_by_key<K, F>(&self, key: F) -> Option<(SessionId, Arc<T>)>
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        let mut sessions = self.lock();
        let id = sessions
            .iter()
            .min_by_key(|(_, state)| key(state))
            .map(|(id, _)| id.clone())?;
        sessions.remove(&id).map(|state| (id, state))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
