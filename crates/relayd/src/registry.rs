use crate::connection::Outbound;
use dashmap::DashMap;
use relay_common::types::{close_code, close_reason, Role};
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle held in a session slot — used to deliver frames and closes to
/// a connection's task.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    /// Channel sender for delivering commands to this connection's task.
    pub tx: mpsc::Sender<Outbound>,
    /// Instant this connection attached (identity guard for slot clears).
    pub connected_at: Instant,
}

impl PeerHandle {
    /// Asks this connection's task to close. Best-effort: a full or
    /// already-closed queue means the task is on its way out anyway.
    fn request_close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(Outbound::Close { code, reason });
    }
}

/// One session's pair of role slots.
#[derive(Debug, Default)]
struct SessionEntry {
    agent: Option<PeerHandle>,
    relay: Option<PeerHandle>,
}

impl SessionEntry {
    fn slot_mut(&mut self, role: Role) -> &mut Option<PeerHandle> {
        match role {
            Role::Agent => &mut self.agent,
            Role::Relay => &mut self.relay,
        }
    }

    fn slot(&self, role: Role) -> &Option<PeerHandle> {
        match role {
            Role::Agent => &self.agent,
            Role::Relay => &self.relay,
        }
    }

    fn is_vacant(&self) -> bool {
        self.agent.is_none() && self.relay.is_none()
    }
}

/// Concurrent sessionId → {agent, relay} pairing table.
///
/// Entries are created lazily on the first install for a session id and
/// removed the instant both slots are vacant. Slot mutations for one
/// session are serialized by the map's entry lock, so two replacements
/// for the same role can never interleave.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<String, SessionEntry>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle` into the `role` slot of `session`, creating the
    /// session entry if needed. An existing occupant is sent a
    /// `1012 replaced` close before the new handle takes the slot — the
    /// newest connection for a role always wins, never silently.
    ///
    /// Returns `true` when an occupant was displaced.
    pub fn install(&self, session: &str, role: Role, handle: PeerHandle) -> bool {
        let mut entry = self.sessions.entry(session.to_string()).or_default();
        let slot = entry.slot_mut(role);
        let displaced = match slot.take() {
            Some(old) => {
                old.request_close(close_code::REPLACED, close_reason::REPLACED);
                true
            }
            None => false,
        };
        *slot = Some(handle);
        displaced
    }

    /// Clears the `role` slot of `session`, but only while it is still
    /// occupied by the handle that attached at `connected_at` — a handle
    /// that was displaced must not evict its replacement. Removes the
    /// session entry entirely once both slots are vacant.
    pub fn clear_if(&self, session: &str, role: Role, connected_at: Instant) {
        if let dashmap::mapref::entry::Entry::Occupied(mut occupied) =
            self.sessions.entry(session.to_string())
        {
            let entry = occupied.get_mut();
            let slot = entry.slot_mut(role);
            if slot
                .as_ref()
                .is_some_and(|h| h.connected_at == connected_at)
            {
                *slot = None;
            }
            if entry.is_vacant() {
                occupied.remove();
            }
        }
    }

    /// Current occupant of the role opposite `role` in `session`, if any.
    /// Always a fresh lookup; callers must not cache the result across
    /// messages because the peer may be replaced at any time.
    #[must_use]
    pub fn peer(&self, session: &str, role: Role) -> Option<PeerHandle> {
        self.sessions
            .get(session)
            .and_then(|entry| entry.slot(role.opposite()).clone())
    }

    /// Number of live sessions (entries with at least one occupant).
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` when no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
