//! The socket hub: everything that happens to a connection between the
//! handshake and the close frame.
//!
//! [`SocketHub`] owns the tenant registry, the connection registry, the tick
//! scheduler and the backend manager, and implements the connection
//! lifecycle on top of them:
//!
//! 1. **Connect**: cookies are parsed, the tenant is derived from the host,
//!    tenant metadata is fetched once, the identity is resolved, the roster is
//!    rebroadcast and the tenant's chat log is replayed to the newcomer. The
//!    tenant backend is then built (or reused) and its hooks are wired on.
//! 2. **Events**: `message` and `command` have built-in handling; every event
//!    then runs the backend hooks registered for it.
//! 3. **Disconnect**: the connection is unlinked, the roster is rebroadcast
//!    and the backend is told.
//!
//! Login and logout happen out of band (an HTTP route of the embedding
//! application) and reach the hub through [`SocketHub::login_user_hook`] and
//! [`SocketHub::logout_user_hook`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{
    panic_message, BackendManager, ContentProvider, DisconnectInfo, HookContext, HookUser,
};
use crate::commands::{is_authorized, parse_command, Command};
use crate::config::HubConfig;
use crate::connection::{
    parse_cookie_header, Connection, ConnectionId, ConnectionRegistry, ConnectionSender, DebugLog,
};
use crate::identity::{AnonymousNamer, AuthUser, IdentityResolver, NameGenerator, TokenVerifier, WordNamer};
use crate::messaging::{
    HubMessage, COMMAND_EVENT, CONNECTED_EVENT, DEBUG_EVENT, MESSAGE_EVENT, ROSTER_EVENT,
    WHOAMI_EVENT,
};
use crate::roster::compute_roster;
use crate::scheduler::{LoopOutcome, TickScheduler};
use crate::subdomain::tenant_for_host;
use crate::tenant::{ChatMessage, Tenant, TenantInfo, TenantKey, TenantRegistry};

/// What the transport knows about a freshly accepted connection.
#[derive(Debug)]
pub struct ConnectRequest {
    /// Id obtained from [`SocketHub::allocate_connection_id`]
    pub id: ConnectionId,
    /// `Host` header of the handshake
    pub host: Option<String>,
    /// Raw `Cookie` header of the handshake
    pub cookie_header: Option<String>,
    /// Outbound channel of the connection
    pub sender: ConnectionSender,
}

/// Coordinates tenants, connections, backends and loops.
pub struct SocketHub {
    config: HubConfig,
    tenants: Arc<TenantRegistry>,
    connections: Arc<ConnectionRegistry>,
    scheduler: Arc<TickScheduler>,
    backends: BackendManager,
    identity: IdentityResolver,
}

impl SocketHub {
    /// Creates a hub generating two-word anonymous names.
    pub fn new(
        config: HubConfig,
        content: Arc<dyn ContentProvider>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self::with_name_generator(config, content, verifier, Box::new(WordNamer))
    }

    /// Creates a hub with a custom anonymous name generator.
    pub fn with_name_generator(
        config: HubConfig,
        content: Arc<dyn ContentProvider>,
        verifier: Arc<dyn TokenVerifier>,
        names: Box<dyn NameGenerator>,
    ) -> Self {
        let tenants = Arc::new(TenantRegistry::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = Arc::new(TickScheduler::new(tenants.clone(), config.tick_period()));
        let backends = BackendManager::new(
            tenants.clone(),
            content,
            scheduler.clone(),
            connections.clone(),
        );
        let identity = IdentityResolver::new(
            verifier,
            AnonymousNamer::new(names, config.anonymous_suffix.clone()),
        );

        Self {
            config,
            tenants,
            connections,
            scheduler,
            backends,
            identity,
        }
    }

    /// Reserves the id of a connection about to be accepted. The transport
    /// hands it back to the client as the reconnection cookie.
    pub fn allocate_connection_id(&self) -> ConnectionId {
        self.connections.allocate_id()
    }

    /// Runs the connect sequence for a new connection.
    ///
    /// The client receives `connected`, `whoami`, the tenant `roster` and
    /// then the replayed chat log, in that order. A backend that fails to
    /// load is logged; the connection stays up without hooks.
    pub async fn connect(&self, request: ConnectRequest) -> ConnectionId {
        let ConnectRequest {
            id,
            host,
            cookie_header,
            sender,
        } = request;

        let cookies = cookie_header
            .as_deref()
            .map(parse_cookie_header)
            .unwrap_or_default();
        let session_cookie = cookies
            .get(&self.config.session_cookie)
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()));
        let reconnect_from = cookies
            .get(&self.config.reconnect_cookie)
            .and_then(|value| value.parse::<ConnectionId>().ok());

        let tenant_key = tenant_for_host(host.as_deref(), self.config.root_host.as_deref());
        let tenant = self.tenants.get_or_create(&tenant_key);
        info!(
            "🔗 [{}] Connection {} joined (host: {})",
            tenant_key,
            id,
            host.as_deref().unwrap_or("-")
        );

        let info = self.ensure_tenant_info(&tenant).await;
        let _ = sender.send(HubMessage::new(
            CONNECTED_EVENT,
            serde_json::to_value(&info).unwrap_or(Value::Null),
        ));

        let identity = self
            .identity
            .resolve(false, None, &cookies, &session_cookie)
            .await;
        let _ = sender.send(HubMessage::new(
            WHOAMI_EVENT,
            Value::from(identity.name.clone()),
        ));

        let mut connection = Connection::new(id, tenant_key.clone(), session_cookie, cookies, sender);
        connection.name = identity.name;
        connection.authenticated = identity.authenticated;

        // Registration, roster and replay happen under the message log so a
        // concurrent chat line is either replayed or delivered live, never both.
        tenant.with_message_log(|messages| {
            self.connections.register(connection, reconnect_from);
            self.update_roster(&tenant_key);
            for message in messages {
                self.connections
                    .emit_to(id, MESSAGE_EVENT, json!(message));
            }
        });

        match self.backends.build(&tenant_key, true).await {
            Ok(backend) => {
                let emitter = self.connections.with(id, Connection::emitter);
                if let Some(emitter) = emitter {
                    let hooks = backend.socket_hooks(DebugLog::new(emitter));
                    debug!("[{}] Wiring {} hook(s) onto connection {}", tenant_key, hooks.len(), id);
                    self.connections.attach_hooks(id, hooks);
                }
            }
            Err(e) => {
                error!("[{}] Issue setting up backend for connection {}: {}", tenant_key, id, e);
            }
        }

        id
    }

    /// Returns the cached tenant metadata, fetching it on first use.
    ///
    /// A provider failure is logged and answered with the minimal metadata,
    /// which is not cached so the next connection tries again.
    async fn ensure_tenant_info(&self, tenant: &Tenant) -> TenantInfo {
        if let Some(info) = tenant.info() {
            return info;
        }
        match self.backends.content().info(tenant.key()).await {
            Ok(info) => {
                tenant.set_info(info.clone());
                info
            }
            Err(e) => {
                warn!("[{}] Could not load tenant info: {}", tenant.key(), e);
                TenantInfo::new(tenant.key())
            }
        }
    }

    /// Handles one client event: built-in handling first, then every backend
    /// hook registered for `event` on this connection.
    pub async fn handle_event(&self, id: ConnectionId, event: &str, data: Value) {
        match event {
            MESSAGE_EVENT => self.on_message(id, &data).await,
            COMMAND_EVENT => self.on_command(id, &data).await,
            _ => {}
        }
        self.run_hooks(id, event, data).await;
    }

    async fn run_hooks(&self, id: ConnectionId, event: &str, data: Value) {
        let Some((hooks, emitter, user)) = self.connections.with(id, |connection| {
            (
                connection.hooks_for(event),
                connection.emitter(),
                HookUser {
                    username: connection.name.clone(),
                    is_anonymous: self.identity.is_anonymous(&connection.name),
                    session_id: connection.session_cookie.clone(),
                },
            )
        }) else {
            return;
        };

        for hook in hooks {
            let ctx = HookContext {
                emit: emitter.clone(),
                data_in: data.clone(),
                connection_id: id,
                user: user.clone(),
            };
            let outcome = AssertUnwindSafe(async { hook.run(ctx).await })
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            error!("Hook '{}' failed on connection {}: {}", event, id, failure);
            emitter.emit(DEBUG_EVENT, json!({ "hook": event, "message": failure }));
        }
    }

    /// Re-resolves the identity of a connection and stores it.
    async fn refresh_identity(&self, id: ConnectionId) -> Option<TenantKey> {
        let (logged_out, token, cookies, session_cookie, tenant) =
            self.connections.with(id, |connection| {
                (
                    connection.logged_out,
                    connection.token.clone(),
                    connection.cookies.clone(),
                    connection.session_cookie.clone(),
                    connection.tenant.clone(),
                )
            })?;

        let resolved = self
            .identity
            .resolve(logged_out, token.as_deref(), &cookies, &session_cookie)
            .await;
        self.connections.update(id, |connection| {
            connection.name = resolved.name.clone();
            connection.authenticated = resolved.authenticated;
        })?;
        if resolved.needs_roster_refresh {
            self.update_roster(&tenant);
        }
        Some(tenant)
    }

    async fn on_message(&self, id: ConnectionId, data: &Value) {
        let Some(tenant_key) = self.refresh_identity(id).await else {
            return;
        };
        let text = match data {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if text.is_empty() {
            return;
        }
        let Some(name) = self.connections.with(id, |connection| connection.name.clone()) else {
            return;
        };

        let tenant = self.tenants.get_or_create(&tenant_key);
        tenant.record_message(ChatMessage { name, text }, |message| {
            self.connections
                .broadcast(MESSAGE_EVENT, &json!(message), &tenant_key);
        });
    }

    async fn on_command(&self, id: ConnectionId, data: &Value) {
        let Some(tenant_key) = self.refresh_identity(id).await else {
            return;
        };
        let Some((name, emitter)) = self
            .connections
            .with(id, |connection| (connection.name.clone(), connection.emitter()))
        else {
            return;
        };

        let command = match parse_command(data) {
            Ok(command) => command,
            Err(rejection) => {
                emitter.emit(DEBUG_EVENT, Value::from(rejection.to_string()));
                return;
            }
        };

        let tenant = self.tenants.get_or_create(&tenant_key);
        if !is_authorized(&name, tenant.owner().as_deref()) {
            debug!("[{}] Ignoring command from non-owner '{}'", tenant_key, name);
            return;
        }

        info!("[{}] - command {:?} from '{}'", tenant_key, command, name);
        match command {
            Command::RefreshBackend => {
                let reply = match self.backends.build(&tenant_key, false).await {
                    Ok(_) => Value::from("backend refreshed"),
                    Err(e) => Value::from(e.to_string()),
                };
                emitter.emit(DEBUG_EVENT, reply);
            }
            Command::StartGameLoop { tag } => {
                let outcome = self.scheduler.start(&tenant_key, &tag);
                emitter.emit(DEBUG_EVENT, json!(outcome));
            }
            Command::StopGameLoop { tag } => {
                let outcome = self.scheduler.stop(&tenant_key, &tag);
                emitter.emit(DEBUG_EVENT, json!(outcome));
            }
            Command::GameLogs => {
                let reply = match tenant.logs().lines() {
                    Some(lines) => Value::Array(lines),
                    None => Value::from("no logs found"),
                };
                emitter.emit(DEBUG_EVENT, reply);
            }
            Command::Unknown(other) => {
                debug!("[{}] Unknown command '{}'", tenant_key, other);
            }
        }
    }

    /// Runs the disconnect sequence. Unknown ids are ignored.
    pub fn disconnect(&self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            return;
        };
        info!("👋 [{}] Connection {} left", connection.tenant, id);
        self.update_roster(&connection.tenant);

        if let Some(backend) = self.backends.fetch_from_cache(&connection.tenant) {
            let info = DisconnectInfo {
                session_cookie: connection.session_cookie.clone(),
                connection_id: id,
            };
            if let Err(panic) =
                std::panic::catch_unwind(AssertUnwindSafe(|| backend.disconnect_connection(info)))
            {
                error!(
                    "[{}] Backend disconnect hook panicked: {}",
                    connection.tenant,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    /// Marks every connection of a browser session as logged in as `user`.
    ///
    /// Each connection gets `whoami` and its tenant roster is rebroadcast.
    /// Returns the number of connections updated.
    pub fn login_user_hook(&self, session_cookie: &str, user: &AuthUser, token: Option<String>) -> usize {
        let mut updated = 0;
        for id in self.connections.session_connections(session_cookie) {
            let tenant = self.connections.update(id, |connection| {
                connection.name = user.username.clone();
                connection.authenticated = true;
                connection.logged_out = false;
                connection.token = token.clone();
                connection.emit(WHOAMI_EVENT, Value::from(user.username.clone()));
                connection.tenant.clone()
            });
            if let Some(tenant) = tenant {
                self.update_roster(&tenant);
                updated += 1;
            }
        }
        info!("🔐 '{}' logged in on {} connection(s)", user.username, updated);
        updated
    }

    /// Marks every connection of a browser session as logged out; they fall
    /// back to the session's anonymous name.
    pub fn logout_user_hook(&self, session_cookie: &str) -> usize {
        let name = self.identity.anonymous_name(session_cookie);
        let mut updated = 0;
        for id in self.connections.session_connections(session_cookie) {
            let tenant = self.connections.update(id, |connection| {
                connection.name = name.clone();
                connection.authenticated = false;
                connection.logged_out = true;
                connection.token = None;
                connection.emit(WHOAMI_EVENT, Value::from(name.clone()));
                connection.tenant.clone()
            });
            if let Some(tenant) = tenant {
                self.update_roster(&tenant);
                updated += 1;
            }
        }
        info!("🔓 Session logged out on {} connection(s)", updated);
        updated
    }

    /// Sends `payload` under `event` to every connection of `tenant`.
    pub fn broadcast(&self, event: &str, payload: &Value, tenant: &TenantKey) -> usize {
        self.connections.broadcast(event, payload, tenant)
    }

    /// Recomputes the roster of `tenant` and broadcasts it.
    pub fn update_roster(&self, tenant: &TenantKey) -> Vec<String> {
        let entries = self.connections.roster_entries(tenant);
        let names = compute_roster(entries.iter().map(|(_, entry)| entry), |name| {
            self.identity.is_anonymous(name)
        });
        self.connections
            .broadcast(ROSTER_EVENT, &json!(names), tenant);
        names
    }

    /// Forgets cached metadata so the next connection refetches it.
    pub fn clear_tenant_info(&self, tenant: &TenantKey) {
        if let Some(state) = self.tenants.get(tenant) {
            state.clear_info();
        }
    }

    /// Stops the tenant's loops and evicts its backend.
    pub fn refresh_backend(&self, tenant: &TenantKey) -> bool {
        self.backends.refresh_backend(tenant)
    }

    pub fn start_game_loop(&self, tenant: &TenantKey, tag: &str) -> LoopOutcome {
        self.scheduler.start(tenant, tag)
    }

    pub fn stop_game_loop(&self, tenant: &TenantKey, tag: &str) -> LoopOutcome {
        self.scheduler.stop(tenant, tag)
    }

    pub fn is_anonymous_name(&self, name: &str) -> bool {
        self.identity.is_anonymous(name)
    }

    /// Stops every running loop.
    pub fn shutdown(&self) {
        let stopped = self.scheduler.stop_all();
        info!("🛑 Hub shut down, {} game loop(s) stopped", stopped);
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn tenants(&self) -> &Arc<TenantRegistry> {
        &self.tenants
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn scheduler(&self) -> &Arc<TickScheduler> {
        &self.scheduler
    }

    pub fn backends(&self) -> &BackendManager {
        &self.backends
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl std::fmt::Debug for SocketHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHub")
            .field("config", &self.config)
            .field("tenants", &self.tenants.len())
            .field("connections", &self.connections.len())
            .field("loops", &self.scheduler.loop_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticContentProvider;
    use crate::connection::{outbound_channel, ConnectionReceiver};
    use crate::identity::NoAuth;

    fn hub() -> SocketHub {
        SocketHub::new(
            HubConfig::default(),
            Arc::new(StaticContentProvider::new()),
            Arc::new(NoAuth),
        )
    }

    async fn join(hub: &SocketHub, host: &str, cookie: Option<&str>) -> (ConnectionId, ConnectionReceiver) {
        let (sender, receiver) = outbound_channel();
        let id = hub.allocate_connection_id();
        hub.connect(ConnectRequest {
            id,
            host: Some(host.to_string()),
            cookie_header: cookie.map(str::to_string),
            sender,
        })
        .await;
        (id, receiver)
    }

    fn drain(receiver: &mut ConnectionReceiver) -> Vec<HubMessage> {
        let mut out = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_cookieless_connections_get_distinct_sessions() {
        let hub = hub();
        let (a, _rx_a) = join(&hub, "foo.localhost", None).await;
        let (b, _rx_b) = join(&hub, "foo.localhost", None).await;
        let session_a = hub.connections().with(a, |c| c.session_cookie.clone()).unwrap();
        let session_b = hub.connections().with(b, |c| c.session_cookie.clone()).unwrap();
        assert_ne!(session_a, session_b);
        assert!(session_a.starts_with("anon-"));
    }

    #[tokio::test]
    async fn test_root_tenant_without_subdomain() {
        let hub = hub();
        let (id, mut rx) = join(&hub, "localhost:8080", None).await;
        assert_eq!(hub.connections().tenant_of(id), Some(TenantKey::root()));
        let first = drain(&mut rx).remove(0);
        assert_eq!(first.event, CONNECTED_EVENT);
        assert_eq!(first.data, json!({ "subdomain": "#" }));
    }

    #[tokio::test]
    async fn test_empty_message_is_ignored() {
        let hub = hub();
        let (id, mut rx) = join(&hub, "foo.localhost", None).await;
        drain(&mut rx);
        hub.handle_event(id, MESSAGE_EVENT, json!("")).await;
        hub.handle_event(id, MESSAGE_EVENT, Value::Null).await;
        let tenant = hub.tenants().get(&TenantKey::new("foo")).unwrap();
        assert!(tenant.messages().is_empty());
        assert!(drain(&mut rx).iter().all(|m| m.event != MESSAGE_EVENT));
    }

    #[tokio::test]
    async fn test_disconnect_updates_roster() {
        let hub = hub();
        let (a, mut rx_a) = join(&hub, "foo.localhost", Some("tenant_hub=s1")).await;
        let (b, _rx_b) = join(&hub, "foo.localhost", Some("tenant_hub=s2")).await;
        drain(&mut rx_a);

        hub.disconnect(b);
        let roster = drain(&mut rx_a)
            .into_iter()
            .filter(|m| m.event == ROSTER_EVENT)
            .last()
            .unwrap();
        assert_eq!(roster.data.as_array().map(Vec::len), Some(1));
        assert_eq!(hub.connection_count(), 1);
        hub.disconnect(b);
        hub.disconnect(a);
        assert_eq!(hub.connection_count(), 0);
    }
}
