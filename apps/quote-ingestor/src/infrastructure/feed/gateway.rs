//! Feed Gateway Client
//!
//! Implements the feed ports against the HTTP gateway that fronts the
//! broker SDK.
//!
//! # Session Flow
//!
//! 1. `POST /v1/sessions` with the login identity, receive a session id
//! 2. push: `POST /v1/sessions/{id}/connect`, then one
//!    `POST /v1/sessions/{id}/subscriptions` per board; a background pump
//!    long-polls `GET /v1/sessions/{id}/events` and forwards batches to
//!    the cycle's queue
//! 3. poll: `POST /v1/sessions/{id}/quotes` per category
//! 4. `DELETE /v1/sessions/{id}` on disconnect
//!
//! 401 and 403 answers map to [`FeedError::Authentication`]. The pump
//! stops on cancellation, on a failed events poll, or when the gateway
//! reports the session closed; in every case the queue sender is dropped
//! so the consumer sees the channel close. A failed poll is kept as the
//! session's delivery outcome.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::messages::{
    EventsResponse, GatewayErrorBody, LoginRequest, QueryRequest, QueryResponse, SessionResponse,
};
use crate::application::ports::{FeedConnector, FeedCredentials, FeedError, FeedSession};
use crate::domain::quote::{FeedBatch, InstrumentKind, Subscription};
use crate::infrastructure::config::FeedSettings;

/// Slack added to the long-poll wait for the request timeout.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

// =============================================================================
// Connector
// =============================================================================

/// Opens sessions on the feed gateway.
#[derive(Debug, Clone)]
pub struct GatewayConnector {
    client: Client,
    base_url: String,
    events_wait: Duration,
}

impl GatewayConnector {
    /// Create a connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &FeedSettings) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(settings.events_wait + REQUEST_SLACK)
            .build()
            .map_err(|e| FeedError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}/v1", settings.gateway_url.trim_end_matches('/')),
            events_wait: settings.events_wait,
        })
    }
}

#[async_trait]
impl FeedConnector for GatewayConnector {
    async fn login(&self, credentials: &FeedCredentials) -> Result<Box<dyn FeedSession>, FeedError> {
        let body = LoginRequest {
            broker_id: credentials.broker_id(),
            dni: credentials.dni(),
            user: credentials.user(),
            password: credentials.password(),
        };

        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(connection)?;
        let session: SessionResponse = decode(check(response, "login").await?).await?;

        tracing::debug!(
            broker_id = credentials.broker_id(),
            session_id = %session.session_id,
            "Feed login accepted"
        );

        Ok(Box::new(GatewaySession {
            client: self.client.clone(),
            session_url: format!("{}/sessions/{}", self.base_url, session.session_id),
            events_wait: self.events_wait,
            pump: None,
        }))
    }
}

// =============================================================================
// Session
// =============================================================================

struct Pump {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), FeedError>>,
}

/// One gateway session. Dropping it stops the event pump.
pub struct GatewaySession {
    client: Client,
    session_url: String,
    events_wait: Duration,
    pump: Option<Pump>,
}

impl GatewaySession {
    async fn post_empty(&self, path: &str, action: &str) -> Result<(), FeedError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.session_url))
            .send()
            .await
            .map_err(connection)?;
        check(response, action).await.map(drop)
    }

    async fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            match pump.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Event pump had already failed"),
                Err(e) => tracing::warn!(error = %e, "Event pump ended abnormally"),
            }
        }
    }
}

#[async_trait]
impl FeedSession for GatewaySession {
    async fn connect(&mut self, sink: mpsc::Sender<FeedBatch>) -> Result<(), FeedError> {
        self.stop_pump().await;
        self.post_empty("connect", "connect").await?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pump_events(
            self.client.clone(),
            format!("{}/events", self.session_url),
            self.events_wait,
            sink,
            cancel.clone(),
        ));
        self.pump = Some(Pump { cancel, handle });
        Ok(())
    }

    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), FeedError> {
        let response = self
            .client
            .post(format!("{}/subscriptions", self.session_url))
            .json(subscription)
            .send()
            .await
            .map_err(connection)?;
        check(response, "subscribe").await.map(drop)
    }

    async fn query(
        &mut self,
        kind: InstrumentKind,
        symbols: &[String],
        settlement: &str,
    ) -> Result<FeedBatch, FeedError> {
        let response = self
            .client
            .post(format!("{}/quotes", self.session_url))
            .json(&QueryRequest {
                kind,
                symbols,
                settlement,
            })
            .send()
            .await
            .map_err(connection)?;
        let quotes: QueryResponse = decode(check(response, "query").await?).await?;
        Ok(FeedBatch::new(kind, quotes.rows))
    }

    async fn delivery_outcome(&mut self) -> Result<(), FeedError> {
        let Some(pump) = self.pump.take() else {
            return Ok(());
        };
        pump.handle
            .await
            .map_err(|e| FeedError::Protocol(format!("event pump ended abnormally: {e}")))?
    }

    async fn disconnect(&mut self) -> Result<(), FeedError> {
        self.stop_pump().await;

        let response = self
            .client
            .delete(&self.session_url)
            .send()
            .await
            .map_err(connection)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, "disconnect").await.map(drop)
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.cancel.cancel();
        }
    }
}

// =============================================================================
// Event Pump
// =============================================================================

async fn pump_events(
    client: Client,
    url: String,
    wait: Duration,
    sink: mpsc::Sender<FeedBatch>,
    cancel: CancellationToken,
) -> Result<(), FeedError> {
    let wait_secs = wait.as_secs().to_string();

    loop {
        let polled = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            polled = poll_events(&client, &url, &wait_secs) => polled,
        };

        let events = polled.inspect_err(|e| {
            tracing::warn!(error = %e, "Event poll failed, closing delivery");
        })?;

        for batch in events.batches.into_iter().filter(|b| !b.is_empty()) {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                sent = sink.send(batch) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        if events.closed {
            tracing::info!("Gateway closed the session stream");
            return Ok(());
        }
    }
}

async fn poll_events(client: &Client, url: &str, wait_secs: &str) -> Result<EventsResponse, FeedError> {
    let response = client
        .get(url)
        .query(&[("wait_secs", wait_secs)])
        .send()
        .await
        .map_err(connection)?;
    decode(check(response, "events").await?).await
}

// =============================================================================
// Helpers
// =============================================================================

#[allow(clippy::needless_pass_by_value)]
fn connection(e: reqwest::Error) -> FeedError {
    FeedError::Connection(e.to_string())
}

async fn check(response: Response, action: &str) -> Result<Response, FeedError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<GatewayErrorBody>(&body).map_or(body, |b| b.error);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FeedError::Authentication(reason),
        _ => FeedError::Protocol(format!("{action} returned {status}: {reason}")),
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, FeedError> {
    response
        .json()
        .await
        .map_err(|e| FeedError::Protocol(format!("undecodable gateway response: {e}")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(uri: &str) -> FeedSettings {
        FeedSettings {
            gateway_url: uri.to_string(),
            events_wait: Duration::from_secs(1),
        }
    }

    fn credentials() -> FeedCredentials {
        FeedCredentials::new(265, "20123456".into(), "trader".into(), "hunter2".into())
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(body_json(json!({
                "broker_id": 265,
                "dni": "20123456",
                "user": "trader",
                "password": "hunter2"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"session_id": "s-1"})))
            .mount(server)
            .await;
    }

    async fn login(server: &MockServer) -> Box<dyn FeedSession> {
        GatewayConnector::new(&settings(&server.uri()))
            .unwrap()
            .login(&credentials())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rejected_login_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "bad password"})))
            .mount(&server)
            .await;

        let result = GatewayConnector::new(&settings(&server.uri()))
            .unwrap()
            .login(&credentials())
            .await;

        assert!(matches!(result, Err(FeedError::Authentication(m)) if m == "bad password"));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = GatewayConnector::new(&settings(&uri))
            .unwrap()
            .login(&credentials())
            .await;
        assert!(matches!(result, Err(FeedError::Connection(_))));
    }

    #[tokio::test]
    async fn query_returns_rows_tagged_with_requested_kind() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/quotes"))
            .and(body_json(json!({
                "kind": "securities",
                "symbols": ["AL30"],
                "settlement": "24hs"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [{"symbol": "AL30", "settlement": "24hs", "last": 70150}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        let batch = session
            .query(InstrumentKind::Securities, &["AL30".to_string()], "24hs")
            .await
            .unwrap();

        assert_eq!(batch.kind, InstrumentKind::Securities);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows[0]["symbol"], "AL30");
    }

    #[tokio::test]
    async fn subscribe_posts_the_subscription() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/subscriptions"))
            .and(body_json(json!({"kind": "repos", "board": "repos"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        session
            .subscribe(&Subscription {
                kind: InstrumentKind::Repos,
                board: "repos".into(),
                settlement: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pushed_batches_reach_the_sink_then_channel_closes() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/connect"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s-1/events"))
            .and(query_param("wait_secs", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "batches": [
                    {"kind": "securities", "rows": [{"symbol": "AL30", "settlement": "24hs"}]},
                    {"kind": "options", "rows": []}
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s-1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"closed": true})))
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        let (tx, mut rx) = mpsc::channel(4);
        session.connect(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, InstrumentKind::Securities);
        assert_eq!(first.len(), 1);
        assert!(rx.recv().await.is_none(), "empty batch skipped, then closed");
    }

    #[tokio::test]
    async fn failed_events_poll_closes_delivery_with_its_error() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/connect"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s-1/events"))
            .respond_with(ResponseTemplate::new(503).set_body_string("gateway restarting"))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        let (tx, mut rx) = mpsc::channel(4);
        session.connect(tx).await.unwrap();

        assert!(rx.recv().await.is_none());
        let outcome = session.delivery_outcome().await;
        assert!(matches!(outcome, Err(FeedError::Protocol(m)) if m.contains("503")));
    }

    #[tokio::test]
    async fn clean_stream_end_is_a_successful_outcome() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/connect"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s-1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"closed": true})))
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        let (tx, mut rx) = mpsc::channel(4);
        session.connect(tx).await.unwrap();

        assert!(rx.recv().await.is_none());
        assert!(session.delivery_outcome().await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_stops_pump_and_deletes_session() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/connect"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s-1/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"batches": []}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/sessions/s-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        let (tx, mut rx) = mpsc::channel(4);
        session.connect(tx).await.unwrap();
        session.disconnect().await.unwrap();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_tolerates_unknown_session() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/v1/sessions/s-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        assert!(session.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn server_error_on_query_is_protocol_error() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s-1/quotes"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let mut session = login(&server).await;
        let err = session
            .query(InstrumentKind::Securities, &[], "24hs")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Protocol(m) if m.contains("upstream down")));
    }
}
