//! Mock transport for testing without a live backend.
//!
//! [`MockTransport`] lets downstream consumers write deterministic tests
//! against the client: scripted replies served in order (cycling when
//! exhausted), an echo mode that mirrors the request payload, optional
//! per-payload failures, and an artificial delay for timeout tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;

use crate::error::{Result, TransportError};
use crate::transport::factory::TransportFactory;
use crate::transport::{ByteStream, RequestOptions, Transport};

/// A scripted reply for one `send` call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Queue this text as the next response.
    Text(String),
    /// Fail the `send` call with this error.
    Error(TransportError),
}

enum ReplyMode {
    Scripted(Vec<Reply>, AtomicUsize),
    Echo,
}

/// A test transport with scripted behavior and call counters.
///
/// # Example
///
/// ```
/// use pynector::transport::{MockTransport, Transport};
/// use std::collections::HashMap;
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::fixed("hello");
/// transport.connect().await.unwrap();
/// transport.send(b"hi", &HashMap::new()).await.unwrap();
/// assert_eq!(transport.send_calls(), 1);
/// # });
/// ```
pub struct MockTransport {
    mode: ReplyMode,
    delay: Option<Duration>,
    fail_for: Option<(Vec<u8>, TransportError)>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    send_calls: AtomicUsize,
    sent_options: Mutex<Vec<RequestOptions>>,
    pending: Mutex<VecDeque<Bytes>>,
}

impl MockTransport {
    fn with_mode(mode: ReplyMode) -> Self {
        Self {
            mode,
            delay: None,
            fail_for: None,
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            sent_options: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Serve the scripted replies in order, cycling when exhausted.
    pub fn scripted(replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty(), "MockTransport requires at least one reply");
        Self::with_mode(ReplyMode::Scripted(replies, AtomicUsize::new(0)))
    }

    /// Always serve the same text reply.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::scripted(vec![Reply::Text(text.into())])
    }

    /// Mirror each request payload back as its response.
    pub fn echo() -> Self {
        Self::with_mode(ReplyMode::Echo)
    }

    /// Sleep this long inside every `send`, for deadline tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail any `send` whose payload contains `needle`.
    pub fn failing_for(mut self, needle: impl Into<Vec<u8>>, error: TransportError) -> Self {
        self.fail_for = Some((needle.into(), error));
        self
    }

    /// Number of `connect` calls observed.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls observed.
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of `send` calls observed.
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// The options each `send` call received, in call order.
    pub fn sent_options(&self) -> Vec<RequestOptions> {
        self.sent_options
            .lock()
            .expect("mock options log poisoned")
            .clone()
    }

    /// Whether the transport is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn next_scripted(&self) -> Option<Reply> {
        match &self.mode {
            ReplyMode::Scripted(replies, index) => {
                let i = index.fetch_add(1, Ordering::SeqCst) % replies.len();
                Some(replies[i].clone())
            }
            ReplyMode::Echo => None,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> std::result::Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(
        &self,
        payload: &[u8],
        options: &RequestOptions,
    ) -> std::result::Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent_options
            .lock()
            .expect("mock options log poisoned")
            .push(options.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((needle, error)) = &self.fail_for {
            if payload.windows(needle.len().max(1)).any(|w| w == &needle[..]) {
                return Err(error.clone());
            }
        }

        let reply = match self.next_scripted() {
            Some(Reply::Text(text)) => Bytes::from(text),
            Some(Reply::Error(error)) => return Err(error),
            None => Bytes::copy_from_slice(payload),
        };
        self.pending
            .lock()
            .expect("mock response queue poisoned")
            .push_back(reply);
        Ok(())
    }

    async fn receive(&self) -> std::result::Result<ByteStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let next = self
            .pending
            .lock()
            .expect("mock response queue poisoned")
            .pop_front();
        match next {
            Some(chunk) => Ok(stream::iter(vec![Ok(chunk)]).boxed()),
            None => Ok(stream::empty().boxed()),
        }
    }
}

/// Factory producing [`MockTransport`]s, for registry-driven tests.
pub struct MockTransportFactory {
    responses: Vec<String>,
}

impl MockTransportFactory {
    /// Factory whose transports serve these replies, cycling.
    pub fn with_responses(responses: Vec<impl Into<String>>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
        }
    }

    /// Factory whose transports echo the request payload.
    pub fn echoing() -> Self {
        Self { responses: Vec::new() }
    }
}

impl TransportFactory for MockTransportFactory {
    fn create_transport(&self, _overrides: &RequestOptions) -> Result<Box<dyn Transport>> {
        if self.responses.is_empty() {
            Ok(Box::new(MockTransport::echo()))
        } else {
            Ok(Box::new(MockTransport::scripted(
                self.responses.iter().cloned().map(Reply::Text).collect(),
            )))
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
