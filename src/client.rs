//! The client dispatcher.
//!
//! [`Pynector`] binds a transport (created through the registry, or
//! injected by the caller) and dispatches single requests, batches with
//! bounded parallelism and per-request isolation, and retry sequences
//! over transient transport failures. Timeouts run through cancel scopes
//! so batch results can always be finalized uniformly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::concurrency::{CancelScope, CapacityLimiter, Lock, TaskGroup};
use crate::config::get_env_config;
use crate::error::{PynectorError, Result};
use crate::telemetry::{get_telemetry, Logger, SpanStatus, Tracer};
use crate::transport::{
    collect_chunks, RequestOptions, Transport, TransportFactoryRegistry,
};

/// One batch entry: request payload plus per-request options.
pub type BatchItem = (Vec<u8>, RequestOptions);

/// Options for [`Pynector::batch_request`].
#[derive(Default, Clone)]
pub struct BatchOptions {
    /// Cap on concurrently running requests. `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Deadline for the whole batch.
    pub timeout: Option<Duration>,
    /// Raise on the first non-cancellation error instead of recording it
    /// in its result slot.
    pub raise_on_error: bool,
    /// Options applied to every request, under each item's own options.
    pub common_options: RequestOptions,
}

struct TransportSlot {
    transport: Option<Arc<dyn Transport>>,
    initialized: bool,
}

/// The core client: dispatches requests through a bound transport.
///
/// # Example
///
/// ```no_run
/// use pynector::Pynector;
/// use std::collections::HashMap;
///
/// # tokio_test::block_on(async {
/// let client = Pynector::builder()
///     .transport_type("http")
///     .transport_option("base_url", serde_json::json!("https://api.example.com"))
///     .build()
///     .unwrap();
///
/// let payload = pynector::transport::http::HttpMessage::new("GET", "/status");
/// use pynector::transport::Message;
/// let body = client
///     .request(&payload.serialize().unwrap(), None, &HashMap::new())
///     .await
///     .unwrap();
/// # let _ = body;
/// client.close().await;
/// # });
/// ```
pub struct Pynector {
    slot: tokio::sync::Mutex<TransportSlot>,
    owns_transport: bool,
    transport_type: String,
    transport_options: RequestOptions,
    config: HashMap<String, Value>,
    registry: Arc<TransportFactoryRegistry>,
    // Serializes send/receive pairs on the shared transport so responses
    // pair with their requests.
    op_lock: Lock,
    tracer: Arc<dyn Tracer>,
    logger: Arc<dyn Logger>,
}

impl Pynector {
    /// Start building a client.
    pub fn builder() -> PynectorBuilder {
        PynectorBuilder::default()
    }

    /// Look up a configuration value: instance config first, then the
    /// `PYNECTOR_`-prefixed environment, then `None`.
    fn config_value(&self, key: &str) -> Option<Value> {
        self.config
            .get(key)
            .cloned()
            .or_else(|| get_env_config(key).map(Value::String))
    }

    fn timeout_from_value(value: &Value) -> Option<Duration> {
        let seconds = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }?;
        (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
    }

    fn resolve_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or_else(|| {
            let value = self.config_value("timeout")?;
            Self::timeout_from_value(&value)
        })
    }

    /// Get the bound transport, creating and connecting it on first use.
    async fn get_transport(&self) -> Result<Arc<dyn Transport>> {
        let mut slot = self.slot.lock().await;
        if slot.transport.is_none() {
            let factory = self.registry.get(&self.transport_type)?;
            slot.transport = Some(Arc::from(factory.create_transport(&self.transport_options)?));
        }
        let transport = slot
            .transport
            .clone()
            .ok_or_else(|| PynectorError::Configuration("transport slot empty".into()))?;

        if !slot.initialized {
            match transport.connect().await {
                Ok(()) => {
                    slot.initialized = true;
                    self.logger.info(
                        "transport.connected",
                        &[
                            ("transport_type", json!(self.transport_type)),
                            ("owns_transport", json!(self.owns_transport)),
                        ],
                    );
                }
                Err(err) => {
                    self.logger.error(
                        "transport.connection_failed",
                        &[
                            ("transport_type", json!(self.transport_type)),
                            ("error", json!(err.to_string())),
                        ],
                    );
                    return Err(err.into());
                }
            }
        }
        Ok(transport)
    }

    /// Explicitly acquire and connect the transport (scoped-acquisition
    /// entry). Subsequent requests reuse it.
    pub async fn connect(&self) -> Result<()> {
        self.get_transport().await.map(|_| ())
    }

    async fn perform_request(
        transport: &Arc<dyn Transport>,
        op_lock: &Lock,
        data: &[u8],
        options: &RequestOptions,
    ) -> Result<Bytes> {
        let _op = op_lock.acquire().await;
        transport.send(data, options).await?;
        let stream = transport.receive().await?;
        Ok(collect_chunks(stream).await?)
    }

    /// Send a single request and return the concatenated response bytes.
    ///
    /// `timeout` falls back to the `timeout` configuration key; when the
    /// deadline fires the call fails with [`PynectorError::Timeout`].
    pub async fn request(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
        options: &RequestOptions,
    ) -> Result<Bytes> {
        let span = self.tracer.start_span("pynector.request");
        span.set_attribute("request.size", json!(data.len()));

        match self.request_inner(data, timeout, options).await {
            Ok(body) => {
                span.set_attribute("response.size", json!(body.len()));
                Ok(body)
            }
            Err(err) => {
                span.record_exception(&err);
                span.set_status(SpanStatus::Error);
                Err(err)
            }
        }
    }

    async fn request_inner(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
        options: &RequestOptions,
    ) -> Result<Bytes> {
        self.logger.info(
            "request.start",
            &[
                ("data_size", json!(data.len())),
                ("timeout", json!(timeout.map(|d| d.as_secs_f64()))),
            ],
        );

        let timeout = self.resolve_timeout(timeout);
        let result = match timeout {
            Some(deadline) => {
                let body = async {
                    let transport = self.get_transport().await?;
                    Self::perform_request(&transport, &self.op_lock, data, options).await
                };
                match CancelScope::with_timeout(deadline).run(body).await {
                    Some(result) => result,
                    None => {
                        self.logger.error(
                            "request.timeout",
                            &[("timeout", json!(deadline.as_secs_f64()))],
                        );
                        Err(PynectorError::Timeout(deadline.as_secs_f64()))
                    }
                }
            }
            None => {
                let transport = self.get_transport().await?;
                Self::perform_request(&transport, &self.op_lock, data, options).await
            }
        };

        match &result {
            Ok(body) => self.logger.info(
                "request.complete",
                &[
                    ("data_size", json!(data.len())),
                    ("result_size", json!(body.len())),
                ],
            ),
            Err(err) => self.logger.error(
                "request.error",
                &[("error", json!(err.to_string()))],
            ),
        }
        result
    }

    /// Dispatch every request in parallel and return the responses (or
    /// errors) in request order.
    ///
    /// Slot `i` always corresponds to `requests[i]`. Per-item options
    /// overwrite the common ones wholesale; an item's `"timeout"` option
    /// (or the configured default timeout) bounds that item on its own,
    /// nested inside the batch deadline. With `raise_on_error` unset,
    /// every slot ends up either a success or an error value; when the
    /// batch deadline fires, unfinished slots hold
    /// [`PynectorError::Timeout`].
    pub async fn batch_request(
        &self,
        requests: Vec<BatchItem>,
        opts: BatchOptions,
    ) -> Result<Vec<Result<Bytes>>> {
        let span = self.tracer.start_span("pynector.batch_request");
        span.set_attribute("request.count", json!(requests.len()));
        if let Some(limit) = opts.max_concurrency {
            span.set_attribute("max_concurrency", json!(limit));
        }
        if let Some(timeout) = opts.timeout {
            span.set_attribute("timeout", json!(timeout.as_secs_f64()));
        }

        match self.batch_request_inner(requests, opts).await {
            Ok(results) => {
                let errors = results.iter().filter(|r| r.is_err()).count();
                span.set_attribute("success_count", json!(results.len() - errors));
                span.set_attribute("error_count", json!(errors));
                Ok(results)
            }
            Err(err) => {
                span.record_exception(&err);
                span.set_status(SpanStatus::Error);
                Err(err)
            }
        }
    }

    async fn batch_request_inner(
        &self,
        requests: Vec<BatchItem>,
        opts: BatchOptions,
    ) -> Result<Vec<Result<Bytes>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        self.logger.info(
            "batch_request.start",
            &[
                ("request_count", json!(requests.len())),
                ("max_concurrency", json!(opts.max_concurrency)),
                ("timeout", json!(opts.timeout.map(|d| d.as_secs_f64()))),
            ],
        );

        let transport = self.get_transport().await?;
        let count = requests.len();
        let results: Arc<std::sync::Mutex<Vec<Option<Result<Bytes>>>>> =
            Arc::new(std::sync::Mutex::new((0..count).map(|_| None).collect()));
        let limiter = opts.max_concurrency.map(CapacityLimiter::new);

        let scope = match opts.timeout {
            Some(timeout) => CancelScope::with_timeout(timeout),
            None => CancelScope::new(),
        };
        let mut group = TaskGroup::with_scope(scope.clone());

        for (index, (payload, request_options)) in requests.into_iter().enumerate() {
            // Flat overwrite: a per-item key replaces the common one
            // wholesale, headers included. The key-wise headers merge is
            // the factory law, not this one.
            let mut merged: RequestOptions = opts
                .common_options
                .clone()
                .into_iter()
                .chain(request_options)
                .collect();
            // An item-level "timeout" option is the item's own deadline,
            // consumed here (zero disables it); otherwise the configured
            // default applies to each item individually, nested inside
            // the batch deadline.
            let item_timeout = match merged.remove("timeout") {
                Some(value) => Self::timeout_from_value(&value),
                None => self.resolve_timeout(None),
            };

            let transport = Arc::clone(&transport);
            let op_lock = self.op_lock.clone();
            let results = Arc::clone(&results);
            let limiter = limiter.clone();
            let raise_on_error = opts.raise_on_error;

            group.start_soon(async move {
                let _token = match &limiter {
                    Some(limiter) => Some(limiter.acquire().await),
                    None => None,
                };
                let exchange = Self::perform_request(&transport, &op_lock, &payload, &merged);
                let outcome = match item_timeout {
                    Some(deadline) => {
                        match CancelScope::with_timeout(deadline).run(exchange).await {
                            Some(result) => result,
                            None => Err(PynectorError::Timeout(deadline.as_secs_f64())),
                        }
                    }
                    None => exchange.await,
                };
                match outcome {
                    Ok(body) => {
                        results.lock().expect("batch slots poisoned")[index] = Some(Ok(body));
                        Ok(())
                    }
                    Err(err) => {
                        results.lock().expect("batch slots poisoned")[index] =
                            Some(Err(err.clone()));
                        if raise_on_error {
                            Err(err)
                        } else {
                            Ok(())
                        }
                    }
                }
            });
        }

        match scope.run(group.wait()).await {
            None => {
                // The batch deadline fired; children were cancelled.
                let timeout = opts
                    .timeout
                    .map(|d| d.as_secs_f64())
                    .unwrap_or_default();
                self.logger.error(
                    "batch_request.timeout",
                    &[("timeout", json!(timeout)), ("request_count", json!(count))],
                );
                if opts.raise_on_error {
                    return Err(PynectorError::Timeout(timeout));
                }
                let mut slots = results.lock().expect("batch slots poisoned");
                for slot in slots.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(Err(PynectorError::Timeout(timeout)));
                    }
                }
            }
            Some(Err(err)) => {
                self.logger.error(
                    "batch_request.error",
                    &[("error", json!(err.to_string()))],
                );
                if opts.raise_on_error {
                    return Err(err);
                }
                let mut slots = results.lock().expect("batch slots poisoned");
                for slot in slots.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(Err(err.clone()));
                    }
                }
            }
            Some(Ok(())) => {}
        }

        // Aborted children may still hold their `results` clone for a
        // moment, so read through the lock instead of unwrapping the Arc.
        let slots: Vec<Option<Result<Bytes>>> =
            results.lock().expect("batch slots poisoned").clone();
        let finalized: Vec<Result<Bytes>> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(PynectorError::Cancelled)))
            .collect();

        let errors = finalized.iter().filter(|r| r.is_err()).count();
        self.logger.info(
            "batch_request.complete",
            &[
                ("request_count", json!(count)),
                ("success_count", json!(count - errors)),
                ("error_count", json!(errors)),
            ],
        );
        Ok(finalized)
    }

    /// Send a request, retrying transient transport failures.
    ///
    /// Up to `max_retries` sequential attempts (`0` counts as one);
    /// attempt `k` sleeps `retry_delay * 2^k` first. Only
    /// [`PynectorError::Transport`] is retried; every other error,
    /// timeouts included, propagates immediately.
    pub async fn request_with_retry(
        &self,
        data: &[u8],
        max_retries: u32,
        retry_delay: Duration,
        options: &RequestOptions,
    ) -> Result<Bytes> {
        let span = self.tracer.start_span("pynector.request_with_retry");
        span.set_attribute("max_retries", json!(max_retries));
        span.set_attribute("retry_delay", json!(retry_delay.as_secs_f64()));

        let attempts = max_retries.max(1);
        let mut last_error: Option<PynectorError> = None;

        for attempt in 0..attempts {
            span.set_attribute("attempt", json!(attempt + 1));
            match self.request(data, None, options).await {
                Ok(body) => {
                    span.set_attribute("successful_attempt", json!(attempt + 1));
                    return Ok(body);
                }
                Err(err) if err.is_transport_error() => {
                    span.record_exception(&err);
                    last_error = Some(err);
                    if attempt + 1 < attempts {
                        let delay = retry_delay.mul_f64(2f64.powi(attempt as i32));
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(PynectorError::Other(
            "retry loop exited without attempting".into(),
        )))
    }

    /// Disconnect the owned transport and drop it. Safe to call multiple
    /// times; injected transports are left untouched.
    pub async fn close(&self) {
        if !self.owns_transport {
            return;
        }
        let mut slot = self.slot.lock().await;
        if let Some(transport) = slot.transport.take() {
            self.logger.info("client.closing", &[]);
            transport.disconnect().await;
            self.logger.info("client.closed", &[]);
        }
        slot.initialized = false;
    }
}

/// Builder for [`Pynector`].
pub struct PynectorBuilder {
    transport: Option<Arc<dyn Transport>>,
    transport_type: String,
    transport_options: RequestOptions,
    config: HashMap<String, Value>,
    registry: Option<TransportFactoryRegistry>,
    enable_telemetry: bool,
}

impl Default for PynectorBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            transport_type: "http".to_string(),
            transport_options: RequestOptions::new(),
            config: HashMap::new(),
            registry: None,
            enable_telemetry: true,
        }
    }
}

impl PynectorBuilder {
    /// Inject a pre-configured transport. The caller keeps ownership;
    /// `close` will not disconnect it.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registry name of the transport to create when none is injected.
    /// Default: `"http"`.
    pub fn transport_type(mut self, transport_type: impl Into<String>) -> Self {
        self.transport_type = transport_type.into();
        self
    }

    /// Set all factory options at once.
    pub fn transport_options(mut self, options: RequestOptions) -> Self {
        self.transport_options = options;
        self
    }

    /// Set a single factory option.
    pub fn transport_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.transport_options.insert(key.into(), value);
        self
    }

    /// Set the instance configuration map.
    pub fn config(mut self, config: HashMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Set a single configuration value.
    pub fn config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Replace the factory registry. Default:
    /// [`TransportFactoryRegistry::with_defaults`].
    pub fn registry(mut self, registry: TransportFactoryRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Enable or disable the telemetry pair. Default: enabled (the
    /// `tracing`-backed pair; without a subscriber it is inert).
    pub fn enable_telemetry(mut self, enabled: bool) -> Self {
        self.enable_telemetry = enabled;
        self
    }

    /// Validate the configuration and build the client.
    ///
    /// When the client will own its transport, the transport type must be
    /// registered; otherwise this fails with
    /// [`PynectorError::UnknownBackend`].
    pub fn build(self) -> Result<Pynector> {
        let registry = self
            .registry
            .unwrap_or_else(TransportFactoryRegistry::with_defaults);
        let owns_transport = self.transport.is_none();
        if owns_transport && !registry.contains(&self.transport_type) {
            return Err(PynectorError::UnknownBackend {
                name: self.transport_type.clone(),
                available: registry.registered_names().join(", "),
            });
        }

        let (tracer, logger) = get_telemetry(self.enable_telemetry);
        Ok(Pynector {
            slot: tokio::sync::Mutex::new(TransportSlot {
                transport: self.transport,
                initialized: false,
            }),
            owns_transport,
            transport_type: self.transport_type,
            transport_options: self.transport_options,
            config: self.config,
            registry: Arc::new(registry),
            op_lock: Lock::new(),
            tracer,
            logger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::{MockTransport, MockTransportFactory, Reply};

    fn no_options() -> RequestOptions {
        RequestOptions::new()
    }

    // Serializes the tests that set PYNECTOR_TIMEOUT against the ones
    // whose timing would be skewed by it.
    static ENV_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        ENV_GUARD.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn echo_client() -> (Pynector, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::echo());
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();
        (client, transport)
    }

    fn scripted_client(replies: Vec<Reply>) -> (Pynector, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::scripted(replies));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (client, transport) = echo_client();
        let body = client.request(b"hello", None, &no_options()).await.unwrap();
        assert_eq!(&body[..], b"hello");
        assert_eq!(transport.send_calls(), 1);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_connected_lazily_and_reused() {
        let (client, transport) = echo_client();
        assert_eq!(transport.connect_calls(), 0);
        client.request(b"one", None, &no_options()).await.unwrap();
        client.request(b"two", None, &no_options()).await.unwrap();
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected_at_build() {
        let err = match Pynector::builder()
            .transport_type("carrier-pigeon")
            .enable_telemetry(false)
            .build()
        {
            Ok(_) => panic!("expected build to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, PynectorError::UnknownBackend { .. }));
    }

    #[tokio::test]
    async fn test_owned_transport_from_registry() {
        let mut registry = TransportFactoryRegistry::new();
        registry.register("mock", Arc::new(MockTransportFactory::echoing()));

        let client = Pynector::builder()
            .transport_type("mock")
            .registry(registry)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let body = client.request(b"ping", None, &no_options()).await.unwrap();
        assert_eq!(&body[..], b"ping");
        client.close().await;
    }

    #[tokio::test]
    async fn test_request_timeout_raises() {
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(200)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let err = client
            .request(b"slow", Some(Duration::from_millis(20)), &no_options())
            .await
            .unwrap_err();
        assert!(matches!(err, PynectorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_request_timeout_from_config() {
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(200)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .config_value("timeout", json!(0.02))
            .enable_telemetry(false)
            .build()
            .unwrap();

        let err = client.request(b"slow", None, &no_options()).await.unwrap_err();
        assert!(matches!(err, PynectorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_transport_error_passes_through_unwrapped() {
        let (client, _transport) = scripted_client(vec![Reply::Error(
            TransportError::Connection("reset by peer".into()),
        )]);
        let err = client.request(b"x", None, &no_options()).await.unwrap_err();
        match err {
            PynectorError::Transport(TransportError::Connection(msg)) => {
                assert!(msg.contains("reset by peer"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batch_all_succeed_in_order() {
        let (client, transport) = echo_client();
        let requests: Vec<BatchItem> = vec![
            (b"r1".to_vec(), no_options()),
            (b"r2".to_vec(), no_options()),
            (b"r3".to_vec(), no_options()),
        ];
        let results = client
            .batch_request(requests, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for (i, expected) in ["r1", "r2", "r3"].iter().enumerate() {
            assert_eq!(&results[i].as_ref().unwrap()[..], expected.as_bytes());
        }
        assert_eq!(transport.send_calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_partial_failure_fills_slot() {
        let transport = Arc::new(
            MockTransport::echo()
                .failing_for("poison", TransportError::Connection("refused".into())),
        );
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let requests: Vec<BatchItem> = vec![
            (b"ok-1".to_vec(), no_options()),
            (b"poison".to_vec(), no_options()),
            (b"ok-2".to_vec(), no_options()),
        ];
        let results = client
            .batch_request(requests, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(&results[0].as_ref().unwrap()[..], b"ok-1");
        assert!(matches!(
            results[1],
            Err(PynectorError::Transport(TransportError::Connection(_)))
        ));
        assert_eq!(&results[2].as_ref().unwrap()[..], b"ok-2");
    }

    #[tokio::test]
    async fn test_batch_raise_on_error_propagates() {
        let transport = Arc::new(
            MockTransport::echo()
                .failing_for("poison", TransportError::Connection("refused".into())),
        );
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let requests: Vec<BatchItem> = vec![
            (b"ok".to_vec(), no_options()),
            (b"poison".to_vec(), no_options()),
        ];
        let err = client
            .batch_request(
                requests,
                BatchOptions {
                    raise_on_error: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_batch_deadline_fills_unfinished_slots() {
        let _env = env_guard();
        // Each request takes ~60ms and the transport ops serialize, so
        // only the first finishes inside the batch deadline.
        let transport = Arc::new(MockTransport::echo().with_delay(Duration::from_millis(60)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let requests: Vec<BatchItem> = vec![
            (b"a".to_vec(), no_options()),
            (b"b".to_vec(), no_options()),
            (b"c".to_vec(), no_options()),
        ];
        let results = client
            .batch_request(
                requests,
                BatchOptions {
                    timeout: Some(Duration::from_millis(90)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let timed_out = results
            .iter()
            .filter(|r| matches!(r, Err(PynectorError::Timeout(_))))
            .count();
        assert!(ok >= 1, "at least the first request should finish");
        assert_eq!(ok + timed_out, 3);
    }

    #[tokio::test]
    async fn test_batch_deadline_raises_when_asked() {
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(100)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let requests: Vec<BatchItem> =
            vec![(b"a".to_vec(), no_options()), (b"b".to_vec(), no_options())];
        let err = client
            .batch_request(
                requests,
                BatchOptions {
                    timeout: Some(Duration::from_millis(20)),
                    raise_on_error: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PynectorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_batch_item_headers_replace_common_wholesale() {
        let (client, transport) = echo_client();

        let mut common = RequestOptions::new();
        common.insert(
            "headers".to_string(),
            json!({"X-Common": "yes", "X-Both": "common"}),
        );
        let mut item_options = RequestOptions::new();
        item_options.insert("headers".to_string(), json!({"X-Both": "item"}));

        let requests: Vec<BatchItem> = vec![(b"r1".to_vec(), item_options)];
        client
            .batch_request(
                requests,
                BatchOptions {
                    common_options: common,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Flat dict-update semantics: the item's headers object replaces
        // the common one wholesale, no key-wise merge.
        let seen = transport.sent_options();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["headers"], json!({"X-Both": "item"}));
    }

    #[tokio::test]
    async fn test_batch_common_options_apply_when_item_has_none() {
        let (client, transport) = echo_client();

        let mut common = RequestOptions::new();
        common.insert("headers".to_string(), json!({"X-Common": "yes"}));

        let requests: Vec<BatchItem> = vec![(b"r1".to_vec(), RequestOptions::new())];
        client
            .batch_request(
                requests,
                BatchOptions {
                    common_options: common,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let seen = transport.sent_options();
        assert_eq!(seen[0]["headers"], json!({"X-Common": "yes"}));
    }

    #[tokio::test]
    async fn test_batch_uses_default_config_timeout_per_item() {
        // No batch-wide deadline; the configured default timeout applies
        // to each item on its own, so a slow transport cannot hang the
        // batch.
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(200)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .config_value("timeout", json!(0.05))
            .enable_telemetry(false)
            .build()
            .unwrap();

        let requests: Vec<BatchItem> =
            vec![(b"a".to_vec(), no_options()), (b"b".to_vec(), no_options())];
        let results = client
            .batch_request(requests, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for slot in &results {
            assert!(matches!(slot, Err(PynectorError::Timeout(_))), "got {slot:?}");
        }
    }

    #[tokio::test]
    async fn test_batch_item_timeout_option_overrides_default() {
        // The item's own "timeout" option wins over the configured
        // default and is consumed by the client, not forwarded.
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(50)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .config_value("timeout", json!(0.005))
            .enable_telemetry(false)
            .build()
            .unwrap();

        let mut item_options = RequestOptions::new();
        item_options.insert("timeout".to_string(), json!(5.0));

        let requests: Vec<BatchItem> = vec![(b"a".to_vec(), item_options)];
        let results = client
            .batch_request(requests, BatchOptions::default())
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert!(!transport.sent_options()[0].contains_key("timeout"));
    }

    #[tokio::test]
    async fn test_batch_empty_returns_empty_without_transport() {
        let (client, transport) = echo_client();
        let results = client
            .batch_request(Vec::new(), BatchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(transport.connect_calls(), 0);
        assert_eq!(transport.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_bounded_concurrency() {
        let (client, _transport) = echo_client();
        let requests: Vec<BatchItem> = (0..8)
            .map(|i| (format!("req-{i}").into_bytes(), no_options()))
            .collect();
        let results = client
            .batch_request(
                requests,
                BatchOptions {
                    max_concurrency: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(&result.as_ref().unwrap()[..], format!("req-{i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn test_retry_transient_then_success() {
        let (client, transport) = scripted_client(vec![
            Reply::Error(TransportError::Connection("reset".into())),
            Reply::Text("recovered".into()),
        ]);

        let start = tokio::time::Instant::now();
        let body = client
            .request_with_retry(b"x", 3, Duration::from_millis(20), &no_options())
            .await
            .unwrap();

        assert_eq!(&body[..], b"recovered");
        assert_eq!(transport.send_calls(), 2);
        // One backoff sleep of retry_delay * 2^0.
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_retry_persistent_failure() {
        let (client, transport) = scripted_client(vec![Reply::Error(
            TransportError::Connection("reset".into()),
        )]);

        let err = client
            .request_with_retry(b"x", 3, Duration::from_millis(1), &no_options())
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(transport.send_calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_zero_is_single_attempt() {
        let (client, transport) = scripted_client(vec![Reply::Error(
            TransportError::Connection("reset".into()),
        )]);
        let err = client
            .request_with_retry(b"x", 0, Duration::from_millis(1), &no_options())
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(transport.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_non_transport_errors() {
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(100)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .config_value("timeout", json!(0.02))
            .enable_telemetry(false)
            .build()
            .unwrap();

        let err = client
            .request_with_retry(b"x", 3, Duration::from_millis(1), &no_options())
            .await
            .unwrap_err();
        assert!(matches!(err, PynectorError::Timeout(_)));
        assert_eq!(transport.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_close_owned_transport_disconnects_once() {
        let mut registry = TransportFactoryRegistry::new();
        registry.register("mock", Arc::new(MockTransportFactory::echoing()));
        let client = Pynector::builder()
            .transport_type("mock")
            .registry(registry)
            .enable_telemetry(false)
            .build()
            .unwrap();

        client.request(b"x", None, &no_options()).await.unwrap();
        client.close().await;
        client.close().await; // idempotent
    }

    #[tokio::test]
    async fn test_close_never_disconnects_injected_transport() {
        let (client, transport) = echo_client();
        client.request(b"x", None, &no_options()).await.unwrap();
        client.close().await;
        assert_eq!(transport.disconnect_calls(), 0);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_explicit_connect_is_scoped_acquisition() {
        let (client, transport) = echo_client();
        client.connect().await.unwrap();
        assert_eq!(transport.connect_calls(), 1);
        client.request(b"x", None, &no_options()).await.unwrap();
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_config_env_fallback() {
        let _env = env_guard();
        std::env::set_var("PYNECTOR_TIMEOUT", "0.02");
        let transport =
            Arc::new(MockTransport::echo().with_delay(Duration::from_millis(200)));
        let client = Pynector::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .enable_telemetry(false)
            .build()
            .unwrap();

        let err = client.request(b"x", None, &no_options()).await.unwrap_err();
        std::env::remove_var("PYNECTOR_TIMEOUT");
        assert!(matches!(err, PynectorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_instance_config_beats_env() {
        let _env = env_guard();
        std::env::set_var("PYNECTOR_TIMEOUT", "0.001");
        // Instance config says 5s; the env's 1ms must not apply.
        let transport = Arc::new(MockTransport::echo());
        let client = Pynector::builder()
            .transport(transport as Arc<dyn Transport>)
            .config_value("timeout", json!(5.0))
            .enable_telemetry(false)
            .build()
            .unwrap();
        let result = client.request(b"x", None, &no_options()).await;
        std::env::remove_var("PYNECTOR_TIMEOUT");
        assert!(result.is_ok());
    }
}
