//! # Service Bus REST Transport
//!
//! Receive-and-delete over the Service Bus REST API: each receive is a destructive read,
//! `DELETE https://{namespace}/{entity}/messages/head?timeout={seconds}`, authorized with a SAS
//! token. A processor runs `max_concurrent_calls` receive loops; each loop handles one message at
//! a time, so handler concurrency never exceeds that bound.
//!
//! The REST API has no prefetch; a non-zero `prefetch_count` is accepted and ignored.
//!
//! A loop that hits a non-transient error (401/403/404) reports it and exits. Transient errors
//! are reported and retried after a short backoff.

pub mod connection_string;
pub mod sas;

pub use connection_string::ConnectionString;
pub use sas::SasTokenProvider;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DrainWorkerConfig;
use crate::messaging::traits::{BrokerClient, MessageHandler, Processor};
use crate::messaging::types::{
    BrokerMessage, ErrorSource, ProcessErrorContext, ProcessMessageContext, ProcessorOptions,
};
use crate::messaging::{MessagingError, MessagingResult};

/// Server-side wait for a message before the broker answers 204
const RECEIVE_WAIT_SECONDS: u64 = 5;
/// Pause after a failed receive before the loop tries again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const API_VERSION: &str = "2015-01";
const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";

/// Broker properties returned with a received message
#[derive(Debug, Default, Deserialize)]
struct BrokerProperties {
    #[serde(rename = "MessageId")]
    message_id: Option<String>,
    #[serde(rename = "CorrelationId")]
    correlation_id: Option<String>,
    #[serde(rename = "EnqueuedTimeUtc")]
    enqueued_time_utc: Option<String>,
}

/// REST-backed broker client
#[derive(Debug, Clone)]
pub struct RestBrokerClient {
    http: reqwest::Client,
    namespace_host: String,
    base_url: String,
    tokens: Arc<SasTokenProvider>,
}

impl RestBrokerClient {
    pub fn new(connection: &ConnectionString, config: &DrainWorkerConfig) -> MessagingResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout)
            .timeout(config.connection_timeout + Duration::from_secs(RECEIVE_WAIT_SECONDS))
            .build()
            .map_err(|e| MessagingError::connection(&connection.namespace_host, e.to_string()))?;

        let tokens = SasTokenProvider::new(
            connection.resource_uri(),
            connection.shared_access_key_name.clone(),
            connection.shared_access_key.clone(),
            config.time_to_live,
        );

        info!(
            namespace = %connection.namespace_host,
            "🚀 REST: Service Bus client created"
        );

        Ok(Self {
            http,
            namespace_host: connection.namespace_host.clone(),
            base_url: format!("https://{}", connection.namespace_host),
            tokens: Arc::new(tokens),
        })
    }

    /// Send requests to `base_url` instead of `https://{namespace}`; SAS tokens are still
    /// signed for the namespace
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn receive_url(&self, entity_path: &str) -> MessagingResult<reqwest::Url> {
        let raw = format!(
            "{}/{}/messages/head?timeout={}&api-version={}",
            self.base_url,
            entity_path.trim_matches('/'),
            RECEIVE_WAIT_SECONDS,
            API_VERSION
        );
        reqwest::Url::parse(&raw).map_err(|e| {
            MessagingError::connection(entity_path, format!("invalid entity url '{raw}': {e}"))
        })
    }
}

#[async_trait]
impl BrokerClient for RestBrokerClient {
    async fn create_processor(
        &self,
        entity_path: &str,
        options: ProcessorOptions,
    ) -> MessagingResult<Box<dyn Processor>> {
        let receive_url = self.receive_url(entity_path)?;

        if options.prefetch_count > 0 {
            debug!(
                entity_path = %entity_path,
                prefetch_count = options.prefetch_count,
                "REST transport has no prefetch; ignoring prefetch_count"
            );
        }

        Ok(Box::new(RestProcessor {
            identifier: format!("{entity_path}-{}", Uuid::new_v4()),
            entity_path: entity_path.to_string(),
            receiver: Arc::new(Receiver {
                http: self.http.clone(),
                tokens: self.tokens.clone(),
                receive_url,
            }),
            options,
            handler: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            processing: Arc::new(AtomicBool::new(false)),
            closed: false,
        }))
    }

    fn provider_name(&self) -> &'static str {
        "servicebus_rest"
    }
}

#[derive(Debug)]
struct Receiver {
    http: reqwest::Client,
    tokens: Arc<SasTokenProvider>,
    receive_url: reqwest::Url,
}

impl Receiver {
    /// One destructive read; `Ok(None)` when the entity had nothing to give
    async fn receive_and_delete(&self, entity_path: &str) -> MessagingResult<Option<BrokerMessage>> {
        let response = self
            .http
            .delete(self.receive_url.clone())
            .header(header::AUTHORIZATION, self.tokens.token())
            .header(header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let properties = response
                    .headers()
                    .get(BROKER_PROPERTIES_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| serde_json::from_str::<BrokerProperties>(value).ok())
                    .unwrap_or_default();
                let body = response.bytes().await?;
                Ok(Some(to_broker_message(properties, body.to_vec())))
            }
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MessagingError::authentication(
                format!("{} rejected the SAS token for {entity_path}", response.status()),
            )),
            StatusCode::NOT_FOUND => Err(MessagingError::entity_not_found(entity_path)),
            status => Err(MessagingError::receive(
                entity_path,
                format!("unexpected status {status}"),
            )),
        }
    }
}

fn to_broker_message(properties: BrokerProperties, body: Vec<u8>) -> BrokerMessage {
    let mut message = BrokerMessage::new(body);
    if let Some(message_id) = properties.message_id {
        message = message.with_message_id(message_id);
    }
    if let Some(correlation_id) = properties.correlation_id {
        message = message.with_correlation_id(correlation_id);
    }
    if let Some(enqueued_at) = properties
        .enqueued_time_utc
        .as_deref()
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
    {
        message.enqueued_at = enqueued_at.with_timezone(&Utc);
    }
    message
}

/// Processor over one Service Bus entity
pub struct RestProcessor {
    identifier: String,
    entity_path: String,
    receiver: Arc<Receiver>,
    options: ProcessorOptions,
    handler: Option<Arc<dyn MessageHandler>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    processing: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl Processor for RestProcessor {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    fn register_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handler = Some(handler);
    }

    async fn start_processing(&mut self) -> MessagingResult<()> {
        if self.closed {
            return Err(MessagingError::invalid_state("processor is closed"));
        }
        if self.processing.load(Ordering::Acquire) {
            return Err(MessagingError::invalid_state("processor is already running"));
        }
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| MessagingError::invalid_state("no message handler registered"))?;

        let loops = self.options.max_concurrent_calls.max(1);
        for _ in 0..loops {
            let receive_loop = ReceiveLoop {
                receiver: self.receiver.clone(),
                handler: handler.clone(),
                shutdown: self.shutdown.clone(),
                entity_path: self.entity_path.clone(),
                identifier: self.identifier.clone(),
            };
            self.tracker.spawn(receive_loop.run());
        }
        self.processing.store(true, Ordering::Release);

        info!(
            entity_path = %self.entity_path,
            processor = %self.identifier,
            receive_loops = loops,
            "🚀 REST: Processing started"
        );
        Ok(())
    }

    async fn stop_processing(&mut self) -> MessagingResult<()> {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.processing.store(false, Ordering::Release);

        debug!(
            entity_path = %self.entity_path,
            processor = %self.identifier,
            "🛑 REST: Processing stopped"
        );
        Ok(())
    }

    async fn close(&mut self) -> MessagingResult<()> {
        if self.closed {
            return Ok(());
        }
        let stopped = self.stop_processing().await;
        self.closed = true;
        stopped
    }

    fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }
}

impl Drop for RestProcessor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct ReceiveLoop {
    receiver: Arc<Receiver>,
    handler: Arc<dyn MessageHandler>,
    shutdown: CancellationToken,
    entity_path: String,
    identifier: String,
}

impl ReceiveLoop {
    async fn run(self) {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.receiver.receive_and_delete(&self.entity_path) => received,
            };

            match received {
                Ok(Some(message)) => {
                    let context = ProcessMessageContext {
                        message,
                        entity_path: self.entity_path.clone(),
                        identifier: self.identifier.clone(),
                    };
                    if let Err(error) = self.handler.process_message(context).await {
                        self.report(error, ErrorSource::UserCallback).await;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    let source = match error {
                        MessagingError::Connection { .. } | MessagingError::Timeout { .. } => {
                            ErrorSource::Connection
                        }
                        _ => ErrorSource::Receive,
                    };
                    let transient = error.is_transient();
                    self.report(error, source).await;
                    if !transient {
                        break;
                    }

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn report(&self, error: MessagingError, error_source: ErrorSource) {
        warn!(
            entity_path = %self.entity_path,
            processor = %self.identifier,
            error_source = %error_source,
            error = %error,
            "⚠️ REST: Receive loop error"
        );
        self.handler
            .process_error(ProcessErrorContext {
                error,
                error_source,
                entity_path: self.entity_path.clone(),
                identifier: self.identifier.clone(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client() -> RestBrokerClient {
        let connection = ConnectionString::parse(
            "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=drain;SharedAccessKey=k",
        )
        .unwrap();
        RestBrokerClient::new(&connection, &DrainWorkerConfig::default()).unwrap()
    }

    #[test]
    fn test_receive_url_for_dead_letter_subscription() {
        let url = client()
            .receive_url("events/Subscriptions/audit/$DeadLetterQueue")
            .unwrap();

        assert_eq!(url.host_str(), Some("contoso.servicebus.windows.net"));
        assert_eq!(
            url.path(),
            "/events/Subscriptions/audit/$DeadLetterQueue/messages/head"
        );
        assert!(url.query().unwrap().contains("timeout=5"));
    }

    #[test]
    fn test_base_url_override() {
        let url = client()
            .with_base_url("http://127.0.0.1:8080/")
            .receive_url("orders")
            .unwrap();

        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.path(), "/orders/messages/head");
    }

    #[test]
    fn test_broker_properties_mapping() {
        let properties: BrokerProperties = serde_json::from_str(
            r#"{"MessageId":"m-1","CorrelationId":"c-1","EnqueuedTimeUtc":"Tue, 14 Oct 2025 10:00:00 GMT","SequenceNumber":7}"#,
        )
        .unwrap();
        let message = to_broker_message(properties, b"payload".to_vec());

        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(message.enqueued_at.to_rfc3339(), "2025-10-14T10:00:00+00:00");
        assert_eq!(message.body, b"payload");
    }

    /// Answers every request on a local port with `status_line` and counts the requests
    async fn serve_status(status_line: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));

        let counted = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0_u8; 1024];
                    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(read) => request.extend_from_slice(&chunk[..read]),
                        }
                    }
                    let response =
                        format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (format!("http://{address}"), requests)
    }

    #[derive(Default)]
    struct RecordingHandler {
        errors: parking_lot::Mutex<Vec<MessagingError>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn process_message(&self, _context: ProcessMessageContext) -> MessagingResult<()> {
            Ok(())
        }

        async fn process_error(&self, context: ProcessErrorContext) {
            self.errors.lock().push(context.error);
        }
    }

    #[tokio::test]
    async fn test_rejected_credential_stops_receive_loops() {
        let (base_url, requests) = serve_status("HTTP/1.1 401 Unauthorized").await;
        let handler = Arc::new(RecordingHandler::default());

        let mut processor = client()
            .with_base_url(base_url)
            .create_processor(
                "orders",
                ProcessorOptions {
                    max_concurrent_calls: 2,
                    ..ProcessorOptions::default()
                },
            )
            .await
            .unwrap();
        processor.register_handler(handler.clone());
        processor.start_processing().await.unwrap();

        for _ in 0..200 {
            if handler.errors.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Past the retry backoff, a retrying loop would have sent more requests by now
        tokio::time::sleep(ERROR_BACKOFF + Duration::from_millis(200)).await;
        processor.close().await.unwrap();

        let errors = handler.errors.lock();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|error| matches!(error, MessagingError::Authentication { .. })));
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_entity_maps_to_entity_not_found() {
        let (base_url, _) = serve_status("HTTP/1.1 404 Not Found").await;
        let receiver = Receiver {
            http: reqwest::Client::new(),
            tokens: client().tokens.clone(),
            receive_url: client()
                .with_base_url(base_url)
                .receive_url("ordres")
                .unwrap(),
        };

        let err = receiver.receive_and_delete("ordres").await.unwrap_err();
        assert_eq!(err, MessagingError::entity_not_found("ordres"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_processor_lifecycle_without_handler() {
        let mut processor = client()
            .create_processor("orders", ProcessorOptions::default())
            .await
            .unwrap();

        assert!(processor.identifier().starts_with("orders-"));
        assert!(matches!(
            processor.start_processing().await,
            Err(MessagingError::InvalidState { .. })
        ));
        processor.close().await.unwrap();
        assert!(!processor.is_processing());
    }
}
