//! End-to-end scenarios driven through `SocketHub` without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tenant_hub::connection::{outbound_channel, ConnectionReceiver};
use tenant_hub::*;

const FOO: &str = "foo.localhost:3000";

/// Tokens are read from the `token` cookie.
struct TokenTable;

#[async_trait]
impl TokenVerifier for TokenTable {
    fn token_from_cookies(&self, cookies: &HashMap<String, String>) -> Option<String> {
        cookies.get("token").cloned()
    }

    async fn verify(&self, token: &str) -> Option<AuthUser> {
        match token {
            "alice-token" => Some(AuthUser::new("alice")),
            "bob-token" => Some(AuthUser::new("bob")),
            "admin-token" => Some(AuthUser::new("admin")),
            _ => None,
        }
    }
}

/// Backend without an update method, exposing a few hooks.
struct Chatty {
    resources: TenantResources,
    disconnects: Arc<Mutex<Vec<DisconnectInfo>>>,
}

impl Backend for Chatty {
    fn disconnect_connection(&self, info: DisconnectInfo) {
        self.disconnects.lock().push(info);
    }

    fn socket_hooks(&self, debug_log: DebugLog) -> Vec<SocketHook> {
        let log = self.resources.log.clone();
        vec![
            SocketHook::new("ping", |ctx: HookContext| async move {
                ctx.emit.emit("pong", json!({ "echo": ctx.data_in, "user": ctx.user.username }));
                Ok(())
            }),
            SocketHook::new("note", move |ctx: HookContext| {
                let log = log.clone();
                let debug_log = debug_log.clone();
                async move {
                    log.log(ctx.data_in.clone());
                    debug_log.log(json!("noted"));
                    Ok(())
                }
            }),
            SocketHook::new("boom", |_ctx: HookContext| async move {
                Err(BackendError::execution("kaboom"))
            }),
            SocketHook::new("panic", |_ctx: HookContext| async move { explode() }),
        ]
    }
}

fn explode() -> Result<(), BackendError> {
    panic!("hook exploded")
}

/// Backend with an update method counting ticks.
struct Ticking {
    ticks: Arc<AtomicUsize>,
}

impl Backend for Ticking {
    fn has_update(&self) -> bool {
        true
    }

    fn update(&self, _elapsed_ms: f64, _tag: &str) -> Result<(), BackendError> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn socket_hooks(&self, _debug_log: DebugLog) -> Vec<SocketHook> {
        Vec::new()
    }
}

struct Fixture {
    hub: SocketHub,
    disconnects: Arc<Mutex<Vec<DisconnectInfo>>>,
    ticks: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let provider = StaticContentProvider::new();
    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let ticks = Arc::new(AtomicUsize::new(0));

    let recorded = disconnects.clone();
    provider.register_backend(
        TenantKey::new("foo"),
        Arc::new(move |resources: TenantResources| -> Result<Arc<dyn Backend>, BackendError> {
            Ok(Arc::new(Chatty {
                resources,
                disconnects: recorded.clone(),
            }))
        }),
    );
    provider.register_info(TenantInfo::new(&TenantKey::new("foo")).with_owner("alice"));

    let counted = ticks.clone();
    provider.register_backend(
        TenantKey::new("game"),
        Arc::new(move |_resources: TenantResources| -> Result<Arc<dyn Backend>, BackendError> {
            Ok(Arc::new(Ticking {
                ticks: counted.clone(),
            }))
        }),
    );
    provider.register_info(TenantInfo::new(&TenantKey::new("game")).with_owner("alice"));

    Fixture {
        hub: SocketHub::new(HubConfig::default(), Arc::new(provider), Arc::new(TokenTable)),
        disconnects,
        ticks,
    }
}

async fn join(hub: &SocketHub, host: &str, cookies: &str) -> (ConnectionId, ConnectionReceiver) {
    let (sender, receiver) = outbound_channel();
    let id = hub.allocate_connection_id();
    hub.connect(ConnectRequest {
        id,
        host: Some(host.to_string()),
        cookie_header: (!cookies.is_empty()).then(|| cookies.to_string()),
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

fn events_named(messages: &[HubMessage], event: &str) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.event == event)
        .map(|m| m.data.clone())
        .collect()
}

#[tokio::test]
async fn fresh_connection_receives_connect_sequence() {
    let f = fixture();
    let (_id, mut rx) = join(&f.hub, FOO, "").await;

    let messages = drain(&mut rx);
    let order: Vec<&str> = messages.iter().map(|m| m.event.as_str()).collect();
    assert_eq!(order, vec!["connected", "whoami", "roster"]);

    assert_eq!(messages[0].data, json!({ "subdomain": "foo", "owner": "alice" }));
    let name = messages[1].data.as_str().unwrap().to_string();
    assert!(name.ends_with("_?"));
    assert!(f.hub.is_anonymous_name(&name));
    assert_eq!(messages[2].data, json!([name]));
}

#[tokio::test]
async fn messages_are_broadcast_and_replayed() {
    let f = fixture();
    let (a, mut rx_a) = join(&f.hub, FOO, "tenant_hub=session-a").await;
    let (_b, mut rx_b) = join(&f.hub, FOO, "tenant_hub=session-b").await;
    let (_other, mut rx_other) = join(&f.hub, "bar.localhost", "tenant_hub=session-c").await;
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_other);

    f.hub.handle_event(a, "message", json!("hi")).await;
    let a_name = f.hub.connections().with(a, |c| c.name.clone()).unwrap();
    let expected = json!({ "name": a_name, "text": "hi" });

    assert_eq!(events_named(&drain(&mut rx_a), "message"), vec![expected.clone()]);
    assert_eq!(events_named(&drain(&mut rx_b), "message"), vec![expected.clone()]);
    assert!(events_named(&drain(&mut rx_other), "message").is_empty());

    let (_c, mut rx_c) = join(&f.hub, FOO, "tenant_hub=session-d").await;
    let replay = drain(&mut rx_c);
    assert_eq!(events_named(&replay, "message"), vec![expected]);
    assert_eq!(replay.last().map(|m| m.event.as_str()), Some("message"));
}

#[tokio::test]
async fn replay_keeps_append_order() {
    let f = fixture();
    let (a, _rx_a) = join(&f.hub, FOO, "tenant_hub=s1").await;
    for text in ["one", "two", "three"] {
        f.hub.handle_event(a, "message", json!(text)).await;
    }
    let (_b, mut rx_b) = join(&f.hub, FOO, "tenant_hub=s2").await;
    let texts: Vec<Value> = events_named(&drain(&mut rx_b), "message")
        .into_iter()
        .map(|m| m["text"].clone())
        .collect();
    assert_eq!(texts, vec![json!("one"), json!("two"), json!("three")]);
}

#[tokio::test]
async fn owner_cannot_start_loop_without_update_method() {
    let f = fixture();
    let (owner, mut rx) = join(&f.hub, FOO, "tenant_hub=s1; token=alice-token").await;
    drain(&mut rx);

    f.hub
        .handle_event(owner, "command", json!({ "name": "start-game-loop", "tag": "main" }))
        .await;
    let debug = events_named(&drain(&mut rx), "debug");
    assert_eq!(
        debug,
        vec![json!({
            "success": false,
            "args": ["foo", "backend does not have update method. Game loop: ", "main"]
        })]
    );
}

#[tokio::test]
async fn non_owner_commands_are_ignored() {
    let f = fixture();
    let (user, mut rx) = join(&f.hub, FOO, "tenant_hub=s1; token=bob-token").await;
    drain(&mut rx);
    let builds = f.hub.backends().build_count();

    f.hub
        .handle_event(user, "command", json!({ "name": "refresh-backend" }))
        .await;
    assert!(events_named(&drain(&mut rx), "debug").is_empty());
    assert_eq!(f.hub.backends().build_count(), builds);
}

#[tokio::test]
async fn malformed_commands_get_diagnostics() {
    let f = fixture();
    let (id, mut rx) = join(&f.hub, FOO, "tenant_hub=s1").await;
    drain(&mut rx);

    f.hub.handle_event(id, "command", Value::Null).await;
    f.hub.handle_event(id, "command", json!({ "tag": "main" })).await;
    assert_eq!(
        events_named(&drain(&mut rx), "debug"),
        vec![json!("missing command"), json!("missing command name")]
    );
}

#[tokio::test]
async fn owner_refresh_rebuilds_backend() {
    let f = fixture();
    let (owner, mut rx) = join(&f.hub, FOO, "tenant_hub=s1; token=alice-token").await;
    drain(&mut rx);
    let tenant = TenantKey::new("foo");
    let before = f.hub.backends().fetch_from_cache(&tenant).unwrap();

    f.hub
        .handle_event(owner, "command", json!({ "name": "refresh-backend" }))
        .await;
    assert_eq!(events_named(&drain(&mut rx), "debug"), vec![json!("backend refreshed")]);
    let after = f.hub.backends().fetch_from_cache(&tenant).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn admin_controls_game_loops() {
    let f = fixture();
    let (admin, mut rx) = join(&f.hub, "game.localhost", "tenant_hub=s1; token=admin-token").await;
    drain(&mut rx);
    let tenant = TenantKey::new("game");

    f.hub
        .handle_event(admin, "command", json!({ "name": "start-game-loop", "tag": "main" }))
        .await;
    assert!(f.hub.scheduler().is_running(&tenant, "main"));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(f.ticks.load(Ordering::SeqCst) > 0);

    f.hub
        .handle_event(admin, "command", json!({ "name": "stop-game-loop", "tag": "main" }))
        .await;
    f.hub
        .handle_event(admin, "command", json!({ "name": "stop-game-loop", "tag": "main" }))
        .await;
    let debug = events_named(&drain(&mut rx), "debug");
    assert_eq!(debug.len(), 3);
    assert_eq!(debug[0]["success"], json!(true));
    assert_eq!(debug[1]["args"][1], json!("game loop cleared"));
    assert_eq!(debug[2]["success"], json!(false));
    assert_eq!(debug[2]["args"][1], json!("no such game loop"));
    assert!(!f.hub.scheduler().is_running(&tenant, "main"));
}

#[tokio::test]
async fn game_logs_command() {
    let f = fixture();
    // No backend is registered for this tenant, so it never gets a log.
    let (admin, mut rx_admin) = join(&f.hub, "bare.localhost", "tenant_hub=s0; token=admin-token").await;
    drain(&mut rx_admin);
    f.hub
        .handle_event(admin, "command", json!({ "name": "game-logs" }))
        .await;
    assert_eq!(events_named(&drain(&mut rx_admin), "debug"), vec![json!("no logs found")]);

    // A built backend has a log even before it writes anything.
    let (owner, mut rx) = join(&f.hub, FOO, "tenant_hub=s1; token=alice-token").await;
    drain(&mut rx);
    f.hub
        .handle_event(owner, "command", json!({ "name": "game-logs" }))
        .await;
    assert_eq!(events_named(&drain(&mut rx), "debug"), vec![json!([])]);

    f.hub.handle_event(owner, "note", json!("first")).await;
    f.hub.handle_event(owner, "note", json!("second")).await;
    drain(&mut rx);
    f.hub
        .handle_event(owner, "command", json!({ "name": "game-logs" }))
        .await;
    assert_eq!(
        events_named(&drain(&mut rx), "debug"),
        vec![json!(["second", "first"])]
    );
}

#[tokio::test]
async fn hooks_reply_to_their_connection() {
    let f = fixture();
    let (a, mut rx_a) = join(&f.hub, FOO, "tenant_hub=s1; token=bob-token").await;
    let (_b, mut rx_b) = join(&f.hub, FOO, "tenant_hub=s2").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    f.hub.handle_event(a, "ping", json!(7)).await;
    assert_eq!(
        events_named(&drain(&mut rx_a), "pong"),
        vec![json!({ "echo": 7, "user": "bob" })]
    );
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn failing_hooks_report_through_debug() {
    let f = fixture();
    let (id, mut rx) = join(&f.hub, FOO, "tenant_hub=s1").await;
    drain(&mut rx);

    f.hub.handle_event(id, "boom", Value::Null).await;
    f.hub.handle_event(id, "panic", Value::Null).await;
    let debug = events_named(&drain(&mut rx), "debug");
    assert_eq!(debug.len(), 2);
    assert_eq!(debug[0]["hook"], json!("boom"));
    assert!(debug[0]["message"].as_str().unwrap().contains("kaboom"));
    assert_eq!(debug[1]["message"], json!("hook exploded"));

    // The connection keeps working.
    f.hub.handle_event(id, "ping", json!("still here")).await;
    assert_eq!(events_named(&drain(&mut rx), "pong").len(), 1);
}

#[tokio::test]
async fn concurrent_cold_builds_construct_once() {
    struct SlowProvider {
        constructions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ContentProvider for SlowProvider {
        async fn exports(
            &self,
            _tenant: &TenantKey,
            kind: ExportKind,
        ) -> Result<Exports, ContentLoadError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(match kind {
                ExportKind::Common => Exports::Common(Arc::new(())),
                ExportKind::Backend => {
                    let constructions = self.constructions.clone();
                    Exports::Backend(Arc::new(
                        move |_: TenantResources| -> Result<Arc<dyn Backend>, BackendError> {
                            constructions.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(Ticking {
                                ticks: Arc::new(AtomicUsize::new(0)),
                            }))
                        },
                    ))
                }
            })
        }
    }

    let constructions = Arc::new(AtomicUsize::new(0));
    let hub = Arc::new(SocketHub::new(
        HubConfig::default(),
        Arc::new(SlowProvider {
            constructions: constructions.clone(),
        }),
        Arc::new(NoAuth),
    ));
    let tenant = TenantKey::new("race");

    let builds = (0..8).map(|_| {
        let hub = hub.clone();
        let tenant = tenant.clone();
        tokio::spawn(async move { hub.backends().build(&tenant, true).await.is_ok() })
    });
    let results = futures::future::join_all(builds).await;
    assert!(results.into_iter().all(|r| matches!(r, Ok(true))));
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    assert_eq!(hub.backends().build_count(), 1);
}

#[tokio::test]
async fn login_and_logout_update_every_tab() {
    let f = fixture();
    let (a, mut rx_a) = join(&f.hub, FOO, "tenant_hub=browser").await;
    let (b, mut rx_b) = join(&f.hub, FOO, "tenant_hub=browser").await;
    let (_other, mut rx_other) = join(&f.hub, FOO, "tenant_hub=elsewhere").await;
    let anonymous = f.hub.connections().with(a, |c| c.name.clone()).unwrap();
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_other);

    let updated = f
        .hub
        .login_user_hook("browser", &AuthUser::new("alice"), Some("alice-token".into()));
    assert_eq!(updated, 2);
    assert_eq!(events_named(&drain(&mut rx_a), "whoami"), vec![json!("alice")]);
    assert_eq!(events_named(&drain(&mut rx_b), "whoami"), vec![json!("alice")]);
    let roster = events_named(&drain(&mut rx_other), "roster");
    let last = roster.last().unwrap().as_array().unwrap().clone();
    assert_eq!(last.iter().filter(|n| **n == json!("alice")).count(), 1);
    assert_eq!(f.hub.connections().with(b, |c| c.authenticated), Some(true));

    // A message after login carries the username.
    f.hub.handle_event(b, "message", json!("hello")).await;
    assert_eq!(
        events_named(&drain(&mut rx_other), "message"),
        vec![json!({ "name": "alice", "text": "hello" })]
    );

    f.hub.logout_user_hook("browser");
    assert_eq!(events_named(&drain(&mut rx_a), "whoami"), vec![json!(anonymous.clone())]);
    assert_eq!(f.hub.connections().with(a, |c| c.logged_out), Some(true));

    // Logged-out connections stay anonymous even with a token cookie.
    f.hub.handle_event(a, "message", json!("bye")).await;
    let last = events_named(&drain(&mut rx_other), "message").pop().unwrap();
    assert_eq!(last["name"], json!(anonymous));
}

#[tokio::test]
async fn reconnected_tab_is_excluded_from_roster() {
    let f = fixture();
    let (parent, _rx_parent) = join(&f.hub, FOO, "tenant_hub=tab; token=bob-token").await;
    let (child, mut rx_child) = join(
        &f.hub,
        FOO,
        &format!("tenant_hub=tab; token=bob-token; io={parent}"),
    )
    .await;
    let (_c, mut rx_c) = join(&f.hub, FOO, "tenant_hub=other; token=alice-token").await;

    assert_eq!(f.hub.connections().with(child, |c| c.parent), Some(Some(parent)));
    assert_eq!(f.hub.connections().with(parent, |c| c.child), Some(Some(child)));
    let roster = events_named(&drain(&mut rx_c), "roster").pop().unwrap();
    assert_eq!(roster, json!(["bob", "alice"]));

    f.hub.disconnect(parent);
    assert_eq!(f.hub.connections().with(child, |c| c.parent), Some(None));
    let roster = events_named(&drain(&mut rx_child), "roster").pop().unwrap();
    assert_eq!(roster, json!(["bob", "alice"]));
}

#[tokio::test]
async fn second_reconnection_to_same_parent_keeps_both_tabs_listed() {
    let f = fixture();
    let (parent, _rx_parent) = join(&f.hub, FOO, "tenant_hub=p; token=bob-token").await;
    let (first, mut rx_first) = join(
        &f.hub,
        FOO,
        &format!("tenant_hub=one; token=alice-token; io={parent}"),
    )
    .await;
    let (second, _rx_second) = join(
        &f.hub,
        FOO,
        &format!("tenant_hub=two; token=admin-token; io={parent}"),
    )
    .await;

    assert_eq!(f.hub.connections().with(first, |c| c.parent), Some(None));
    assert_eq!(f.hub.connections().with(second, |c| c.parent), Some(Some(parent)));

    f.hub.disconnect(parent);
    let roster = events_named(&drain(&mut rx_first), "roster").pop().unwrap();
    assert_eq!(roster, json!(["alice", "admin"]));
}

#[tokio::test]
async fn disconnect_notifies_backend() {
    let f = fixture();
    let (id, _rx) = join(&f.hub, FOO, "tenant_hub=leaving").await;
    f.hub.disconnect(id);
    assert_eq!(
        f.disconnects.lock().clone(),
        vec![DisconnectInfo {
            session_cookie: "leaving".into(),
            connection_id: id,
        }]
    );
}

#[tokio::test]
async fn anonymous_names_fall_back_to_cookie() {
    struct Constant;

    impl NameGenerator for Constant {
        fn generate(&self) -> String {
            "Twin".to_string()
        }
    }

    let hub = SocketHub::with_name_generator(
        HubConfig::default(),
        Arc::new(StaticContentProvider::new()),
        Arc::new(NoAuth),
        Box::new(Constant),
    );
    let (a, _rx_a) = join(&hub, FOO, "tenant_hub=first").await;
    let (b, _rx_b) = join(&hub, FOO, "tenant_hub=second").await;
    let (c, _rx_c) = join(&hub, FOO, "tenant_hub=second").await;

    let name = |id| hub.connections().with(id, |c| c.name.clone()).unwrap();
    assert_eq!(name(a), "Twin_?");
    assert_eq!(name(b), "second_?");
    assert_eq!(name(c), "second_?");
}

#[tokio::test]
async fn backend_failure_leaves_connection_usable() {
    let hub = SocketHub::new(
        HubConfig::default(),
        Arc::new(StaticContentProvider::new()),
        Arc::new(NoAuth),
    );
    let (id, mut rx) = join(&hub, "nobackend.localhost", "tenant_hub=s1").await;
    assert!(hub.backends().fetch_from_cache(&TenantKey::new("nobackend")).is_none());
    assert_eq!(hub.connections().with(id, |c| c.hook_count()), Some(0));

    drain(&mut rx);
    hub.handle_event(id, "message", json!("still chatting")).await;
    assert_eq!(events_named(&drain(&mut rx), "message").len(), 1);
}

#[tokio::test]
async fn cleared_tenant_info_is_refetched() {
    let f = fixture();
    let tenant = TenantKey::new("foo");
    let (_a, _rx) = join(&f.hub, FOO, "").await;
    assert!(f.hub.tenants().get(&tenant).unwrap().info().is_some());

    f.hub.clear_tenant_info(&tenant);
    assert!(f.hub.tenants().get(&tenant).unwrap().info().is_none());
    let (_b, mut rx_b) = join(&f.hub, FOO, "").await;
    assert_eq!(drain(&mut rx_b)[0].data["owner"], json!("alice"));
}
