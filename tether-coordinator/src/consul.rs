//! Coordinator backed by a Consul-compatible agent HTTP API.
//!
//! Sessions use the `delete` behavior so keys bound to a session disappear
//! with it. Key bindings are watched with blocking queries: the lost
//! notification fires when the key is deleted, ends up bound to a different
//! session, or the watch itself fails (a partition from the agent's point of
//! view is indistinguishable from a lost binding).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::traits::Coordinator;
use crate::types::{BindingLost, HealthStatus, Registration, SessionId};

/// Extra time granted to a blocking query on top of its `wait` parameter.
const WATCH_SLACK: Duration = Duration::from_secs(5);

/// Header carrying the raft index of a blocking query response.
const INDEX_HEADER: &str = "X-Consul-Index";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreateRequest<'a> {
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    behavior: &'static str,
    lock_delay: &'static str,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Session", default)]
    session: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    check: TtlCheck,
}

#[derive(Serialize)]
struct TtlCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "TTL")]
    ttl: String,
}

/// Render a duration the way the agent parses it (`15s`, `250ms`).
pub(crate) fn agent_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify(status: StatusCode, body: &str) -> CoordinatorError {
    let lowered = body.to_ascii_lowercase();
    if lowered.contains("invalid session") {
        CoordinatorError::SessionInvalid(body.trim().to_string())
    } else if status == StatusCode::NOT_FOUND || lowered.contains("unknown check") {
        CoordinatorError::NotFound(body.trim().to_string())
    } else {
        CoordinatorError::Unknown(format!("{status}: {}", body.trim()))
    }
}

async fn expect_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

fn consul_index(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Client for a Consul-compatible agent.
#[derive(Clone)]
pub struct ConsulCoordinator {
    client: Client,
    config: CoordinatorConfig,
}

impl ConsulCoordinator {
    /// Build a client for the configured agent.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CoordinatorError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url(), path.trim_start_matches('/'))
    }

    fn kv_url(&self, key: &str) -> String {
        self.url(&format!("kv/{}", key.trim_start_matches('/')))
    }
}

#[async_trait]
impl Coordinator for ConsulCoordinator {
    async fn create_session(&self, name: &str, ttl: Duration) -> Result<SessionId> {
        let body = SessionCreateRequest {
            name,
            ttl: agent_duration(ttl),
            behavior: "delete",
            lock_delay: "0s",
        };

        let response = self
            .client
            .put(self.url("session/create"))
            .json(&body)
            .send()
            .await?;
        let created: SessionCreateResponse = expect_success(response).await?.json().await?;

        debug!(session = %created.id, name, "Created coordinator session");
        Ok(SessionId::new(created.id))
    }

    async fn destroy_session(&self, id: &SessionId) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("session/destroy/{id}")))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn renew_session(&self, id: &SessionId) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("session/renew/{id}")))
            .send()
            .await?;

        match expect_success(response).await {
            Ok(_) => Ok(()),
            Err(CoordinatorError::NotFound(_)) => Err(CoordinatorError::SessionExpired),
            Err(e) => Err(e),
        }
    }

    async fn bind_key(&self, session: &SessionId, key: &str, value: &[u8]) -> Result<BindingLost> {
        let url = self.kv_url(key);
        let response = self
            .client
            .put(&url)
            .query(&[("acquire", session.as_str())])
            .body(value.to_vec())
            .send()
            .await?;
        let acquired: bool = expect_success(response).await?.json().await?;

        if !acquired {
            return Err(CoordinatorError::LockHeld(key.to_string()));
        }

        let (tx, lost) = BindingLost::channel();
        tokio::spawn(watch_key(
            self.client.clone(),
            url,
            session.clone(),
            self.config.watch_wait,
            tx,
        ));

        Ok(lost)
    }

    async fn register_endpoint(&self, registration: &Registration) -> Result<()> {
        let body = ServiceRegistration {
            id: &registration.id,
            name: &registration.name,
            address: registration.address.as_deref(),
            port: registration.port,
            check: TtlCheck {
                check_id: registration.check_id(),
                ttl: agent_duration(registration.ttl),
            },
        };

        let response = self
            .client
            .put(self.url("agent/service/register"))
            .json(&body)
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn deregister_endpoint(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("agent/service/deregister/{id}")))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn assert_health(&self, check_id: &str, status: HealthStatus) -> Result<()> {
        let verb = match status {
            HealthStatus::Passing => "pass",
            HealthStatus::Failing => "fail",
        };

        let response = self
            .client
            .put(self.url(&format!("agent/check/{verb}/{check_id}")))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }
}

/// Follow a bound key with blocking queries until it stops being ours.
///
/// Returns without reporting when the lost notification is dropped.
async fn watch_key(
    client: Client,
    url: String,
    session: SessionId,
    wait: Duration,
    mut tx: oneshot::Sender<String>,
) {
    let mut index: u64 = 0;

    let reason = loop {
        let request = client
            .get(&url)
            .query(&[("index", index.to_string()), ("wait", agent_duration(wait))])
            .timeout(wait + WATCH_SLACK);

        let response = tokio::select! {
            _ = tx.closed() => {
                trace!(url = %url, "Binding watch abandoned");
                return;
            }
            response = request.send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => break format!("watch failed: {e}"),
        };

        if response.status() == StatusCode::NOT_FOUND {
            break "key deleted".to_string();
        }
        if !response.status().is_success() {
            break format!("watch failed: {}", response.status());
        }

        let next = consul_index(&response).unwrap_or(0);
        let entries: Vec<KvEntry> = match response.json().await {
            Ok(entries) => entries,
            Err(e) => break format!("watch failed: {e}"),
        };

        let holder = entries.first().and_then(|e| e.session.as_deref());
        if holder != Some(session.as_str()) {
            break "key no longer bound to session".to_string();
        }

        // A smaller index means the agent's raft index was reset.
        index = if next < index { 0 } else { next };
    };

    debug!(url = %url, session = %session, reason = %reason, "Binding lost");
    let _ = tx.send(reason);
}
