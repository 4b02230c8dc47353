//! Connection registry indexing live connections by id and by session.
//!
//! The registry is the single owner of [`Connection`] records. Everything
//! else refers to connections by [`ConnectionId`]. Map guards are never held
//! across calls: lookups clone what they need out of the map and callers work
//! on the copy, which keeps the registry safe to use from hook tasks, tick
//! tasks and the transport concurrently.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::{Connection, ConnectionId, ConnectionSender};
use crate::backend::SocketHook;
use crate::messaging::HubMessage;
use crate::roster::RosterEntry;
use crate::tenant::TenantKey;

/// Tracks every live connection of the process.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    /// Session cookie -> connection ids opened under it, in arrival order
    sessions: DashMap<String, Vec<ConnectionId>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out the next connection id. Ids increase monotonically.
    pub fn allocate_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a connection and indexes it by session.
    ///
    /// When `reconnect_from` names a connection that is still registered, the
    /// new connection becomes its child. Only one child is tracked at a time:
    /// a previous child of that parent is detached and counts as a regular
    /// connection again.
    pub fn register(&self, mut connection: Connection, reconnect_from: Option<ConnectionId>) {
        let id = connection.id;

        if let Some(parent_id) = reconnect_from.filter(|parent| *parent != id) {
            let displaced = self
                .connections
                .get_mut(&parent_id)
                .map(|mut parent| parent.child.replace(id));
            match displaced {
                Some(previous) => {
                    connection.parent = Some(parent_id);
                    if let Some(previous_id) = previous.filter(|previous| *previous != id) {
                        self.update(previous_id, |child| {
                            if child.parent == Some(parent_id) {
                                child.parent = None;
                            }
                        });
                        debug!(
                            "Connection {} replaces {} as child of {}",
                            id, previous_id, parent_id
                        );
                    }
                }
                None => debug!("Reconnection token {} names no live connection", parent_id),
            }
        }

        self.sessions
            .entry(connection.session_cookie.clone())
            .or_default()
            .push(id);
        self.connections.insert(id, connection);
    }

    /// Removes a connection, clears its neighbours' links to it and prunes the
    /// session index. Returns the removed record.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let (_, connection) = self.connections.remove(&id)?;

        if let Some(parent_id) = connection.parent {
            if let Some(mut parent) = self.connections.get_mut(&parent_id) {
                if parent.child == Some(id) {
                    parent.child = None;
                }
            }
        }
        if let Some(child_id) = connection.child {
            if let Some(mut child) = self.connections.get_mut(&child_id) {
                if child.parent == Some(id) {
                    child.parent = None;
                }
            }
        }

        let session_empty = match self.sessions.get_mut(&connection.session_cookie) {
            Some(mut ids) => {
                ids.retain(|other| *other != id);
                ids.is_empty()
            }
            None => false,
        };
        if session_empty {
            self.sessions
                .remove_if(&connection.session_cookie, |_, ids| ids.is_empty());
        }

        Some(connection)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Runs `f` against a connection without exposing the map guard.
    pub fn with<R>(&self, id: ConnectionId, f: impl FnOnce(&Connection) -> R) -> Option<R> {
        self.connections.get(&id).map(|connection| f(&connection))
    }

    /// Mutates a connection in place. Returns `None` if it is gone.
    pub fn update<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.connections.get_mut(&id).map(|mut connection| f(&mut connection))
    }

    /// Wires backend hooks onto a connection, replacing any earlier set.
    pub fn attach_hooks(&self, id: ConnectionId, hooks: Vec<SocketHook>) -> bool {
        self.update(id, |connection| connection.set_hooks(hooks)).is_some()
    }

    pub fn tenant_of(&self, id: ConnectionId) -> Option<TenantKey> {
        self.with(id, |connection| connection.tenant.clone())
    }

    /// Ids of all connections of `tenant`, in arrival order.
    pub fn tenant_connections(&self, tenant: &TenantKey) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| &entry.tenant == tenant)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of all connections opened under `session_cookie`, in arrival order.
    pub fn session_connections(&self, session_cookie: &str) -> Vec<ConnectionId> {
        self.sessions
            .get(session_cookie)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    fn tenant_senders(&self, tenant: &TenantKey) -> Vec<(ConnectionId, ConnectionSender)> {
        let mut senders: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| &entry.tenant == tenant)
            .map(|entry| (*entry.key(), entry.sender().clone()))
            .collect();
        senders.sort_unstable_by_key(|(id, _)| *id);
        senders
    }

    /// Sends `event` to every connection of `tenant` in arrival order.
    ///
    /// Delivery is best-effort: connections whose channel already closed are
    /// skipped. Returns how many connections accepted the event.
    pub fn broadcast(&self, event: &str, payload: &Value, tenant: &TenantKey) -> usize {
        let senders = self.tenant_senders(tenant);
        let mut delivered = 0;
        for (id, sender) in senders {
            let message = HubMessage::new(event, payload.clone());
            if sender.send(message).is_ok() {
                delivered += 1;
            } else {
                debug!("Dropping '{}' for closed connection {}", event, id);
            }
        }
        delivered
    }

    /// Sends `event` to a single connection.
    pub fn emit_to(&self, id: ConnectionId, event: &str, payload: Value) -> bool {
        self.with(id, |connection| connection.emit(event, payload))
            .unwrap_or(false)
    }

    /// Name and child flag of every connection of `tenant`, in arrival order.
    pub fn roster_entries(&self, tenant: &TenantKey) -> Vec<(ConnectionId, RosterEntry)> {
        let mut entries: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| &entry.tenant == tenant)
            .map(|entry| {
                (
                    *entry.key(),
                    RosterEntry {
                        name: entry.name.clone(),
                        is_child: entry.is_child(),
                    },
                )
            })
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
