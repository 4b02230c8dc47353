//! Content provider built from the `[[tenants]]` configuration.

use serde_json::Value;
use tenant_hub::{StaticContentProvider, TenantInfo, TenantKey};
use tracing::info;

use crate::backends;
use crate::config::TenantSettings;

/// Registers metadata and the chosen demo backend of every configured tenant.
pub fn content_from_config(tenants: &[TenantSettings]) -> StaticContentProvider {
    let provider = StaticContentProvider::new();
    for tenant in tenants {
        let key = TenantKey::new(tenant.subdomain.clone());
        let mut tenant_info = TenantInfo::new(&key);
        tenant_info.owner = tenant.owner.clone();
        if let Some(title) = &tenant.title {
            tenant_info.extra.insert("title".to_string(), Value::from(title.clone()));
        }
        provider.register_info(tenant_info);

        if let Some(kind) = tenant.backend {
            provider.register_backend(key.clone(), backends::factory(kind, tenant.autostart));
        }
        info!(
            "📦 Tenant '{}' registered (backend: {:?}, owner: {})",
            key,
            tenant.backend,
            tenant.owner.as_deref().unwrap_or("-")
        );
    }
    provider
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, BackendKind};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tenant_hub::connection::{outbound_channel, ConnectionReceiver};
    use tenant_hub::{ConnectRequest, ConnectionId, HubConfig, HubMessage, NoAuth, SocketHub};

    fn hub(tenants: Vec<TenantSettings>) -> SocketHub {
        SocketHub::new(
            HubConfig::default(),
            Arc::new(content_from_config(&tenants)),
            Arc::new(NoAuth),
        )
    }

    fn tenant(subdomain: &str, backend: Option<BackendKind>, autostart: bool) -> TenantSettings {
        TenantSettings {
            subdomain: subdomain.to_string(),
            owner: Some("admin".to_string()),
            title: Some(subdomain.to_uppercase()),
            backend,
            autostart,
        }
    }

    async fn join(hub: &SocketHub, host: &str) -> (ConnectionId, ConnectionReceiver) {
        let (sender, receiver) = outbound_channel();
        let id = hub.allocate_connection_id();
        hub.connect(ConnectRequest {
            id,
            host: Some(host.to_string()),
            cookie_header: None,
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
    async fn test_connected_payload_carries_title_and_owner() {
        let hub = hub(vec![tenant("echo", Some(BackendKind::Echo), false)]);
        let (_id, mut rx) = join(&hub, "echo.localhost").await;
        let connected = drain(&mut rx).remove(0);
        assert_eq!(
            connected.data,
            json!({ "subdomain": "echo", "owner": "admin", "title": "ECHO" })
        );
    }

    #[tokio::test]
    async fn test_echo_backend_hooks() {
        let hub = hub(vec![tenant("echo", Some(BackendKind::Echo), false)]);
        let (a, mut rx_a) = join(&hub, "echo.localhost").await;
        let (_b, mut rx_b) = join(&hub, "echo.localhost").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.handle_event(a, "echo", json!({ "n": 1 })).await;
        let replies = drain(&mut rx_a);
        assert_eq!(replies, vec![HubMessage::new("echo", json!({ "n": 1 }))]);
        assert!(drain(&mut rx_b).is_empty());

        hub.handle_event(a, "echo", Value::Null).await;
        assert_eq!(drain(&mut rx_a)[0].event, "debug");

        hub.handle_event(a, "shout", json!("hey")).await;
        assert_eq!(drain(&mut rx_a)[0].event, "shout");
        assert_eq!(drain(&mut rx_b)[0].data["data"], json!("hey"));
    }

    #[tokio::test]
    async fn test_ticker_autostarts_and_counts() {
        let hub = hub(vec![tenant("ticker", Some(BackendKind::Ticker), true)]);
        let (id, mut rx) = join(&hub, "ticker.localhost").await;
        let key = TenantKey::new("ticker");
        assert!(hub.scheduler().is_running(&key, "main"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        drain(&mut rx);
        hub.handle_event(id, "ticks", Value::Null).await;
        let reply = drain(&mut rx).remove(0);
        assert_eq!(reply.event, "ticks");
        assert!(reply.data["ticks"].as_u64().unwrap() > 0);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_tenant_without_backend_still_chats() {
        let hub = hub(vec![tenant("plain", None, false)]);
        let (id, mut rx) = join(&hub, "plain.localhost").await;
        drain(&mut rx);
        hub.handle_event(id, "message", json!("hello")).await;
        let events: Vec<String> = drain(&mut rx).into_iter().map(|m| m.event).collect();
        // The anonymous sender's identity refresh rebroadcasts the roster first.
        assert_eq!(events, vec!["roster", "message"]);
    }

    #[test]
    fn test_default_tenants_register() {
        let provider = content_from_config(&AppConfig::default().tenants);
        assert_eq!(provider.tenant_count(), 2);
    }
}
