//! Optional tracing and structured-logging facade.
//!
//! The dispatcher calls these interfaces unconditionally; when telemetry is
//! disabled every call is a no-op, so call sites carry no `if` ladders.
//! The non-no-op implementation emits through the `tracing` crate;
//! installing a subscriber (formatter, exporter) is the embedding
//! application's concern.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::PynectorError;

/// Outcome recorded on a span when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    /// The operation completed normally.
    Ok,
    /// The operation failed.
    Error,
}

/// A single traced operation.
///
/// Spans end when dropped. Attribute writes may happen from concurrent
/// tasks sharing the span.
pub trait Span: Send + Sync {
    /// Attach a key-value attribute to the span.
    fn set_attribute(&self, key: &str, value: Value);

    /// Record a failure against the span.
    fn record_exception(&self, err: &PynectorError);

    /// Set the span's final status.
    fn set_status(&self, status: SpanStatus);
}

/// Produces [`Span`]s.
pub trait Tracer: Send + Sync {
    /// Start a span covering the operation named `name`.
    fn start_span(&self, name: &str) -> Box<dyn Span>;
}

/// Structured, event-named logging.
///
/// `event` is a dotted event name (e.g. `"request.start"`); `fields` are
/// key-value pairs attached to the event.
pub trait Logger: Send + Sync {
    /// Log at debug level.
    fn debug(&self, event: &str, fields: &[(&str, Value)]);
    /// Log at info level.
    fn info(&self, event: &str, fields: &[(&str, Value)]);
    /// Log at warning level.
    fn warning(&self, event: &str, fields: &[(&str, Value)]);
    /// Log at error level.
    fn error(&self, event: &str, fields: &[(&str, Value)]);
    /// Log at critical level.
    fn critical(&self, event: &str, fields: &[(&str, Value)]);
}

/// Span that ignores everything.
pub struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&self, _key: &str, _value: Value) {}
    fn record_exception(&self, _err: &PynectorError) {}
    fn set_status(&self, _status: SpanStatus) {}
}

/// Tracer that produces [`NoopSpan`]s.
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// Logger that ignores everything.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _event: &str, _fields: &[(&str, Value)]) {}
    fn info(&self, _event: &str, _fields: &[(&str, Value)]) {}
    fn warning(&self, _event: &str, _fields: &[(&str, Value)]) {}
    fn error(&self, _event: &str, _fields: &[(&str, Value)]) {}
    fn critical(&self, _event: &str, _fields: &[(&str, Value)]) {}
}

/// Span backed by the `tracing` crate.
///
/// Attributes accumulate under a mutex and are emitted as one event when
/// the span drops, alongside its name and status.
pub struct TracingSpan {
    name: String,
    state: Mutex<SpanState>,
}

struct SpanState {
    attributes: Vec<(String, Value)>,
    status: SpanStatus,
}

impl TracingSpan {
    fn new(name: &str) -> Self {
        tracing::debug!(span = name, "span.start");
        Self {
            name: name.to_string(),
            state: Mutex::new(SpanState {
                attributes: Vec::new(),
                status: SpanStatus::Ok,
            }),
        }
    }
}

impl Span for TracingSpan {
    fn set_attribute(&self, key: &str, value: Value) {
        let mut state = self.state.lock().expect("span state poisoned");
        state.attributes.push((key.to_string(), value));
    }

    fn record_exception(&self, err: &PynectorError) {
        let mut state = self.state.lock().expect("span state poisoned");
        state
            .attributes
            .push(("exception".to_string(), Value::String(err.to_string())));
        state.status = SpanStatus::Error;
    }

    fn set_status(&self, status: SpanStatus) {
        self.state.lock().expect("span state poisoned").status = status;
    }
}

impl Drop for TracingSpan {
    fn drop(&mut self) {
        let state = self.state.lock().expect("span state poisoned");
        let attributes = Value::Object(serde_json::Map::from_iter(
            state.attributes.iter().map(|(k, v)| (k.clone(), v.clone())),
        ));
        match state.status {
            SpanStatus::Ok => tracing::debug!(
                span = %self.name,
                attributes = %attributes,
                "span.end"
            ),
            SpanStatus::Error => tracing::warn!(
                span = %self.name,
                attributes = %attributes,
                "span.end"
            ),
        }
    }
}

/// Tracer backed by the `tracing` crate.
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str) -> Box<dyn Span> {
        Box::new(TracingSpan::new(name))
    }
}

/// Logger backed by the `tracing` crate.
pub struct TracingLogger;

fn fields_json(fields: &[(&str, Value)]) -> Value {
    Value::Object(serde_json::Map::from_iter(
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())),
    ))
}

impl Logger for TracingLogger {
    fn debug(&self, event: &str, fields: &[(&str, Value)]) {
        tracing::debug!(event, fields = %fields_json(fields));
    }

    fn info(&self, event: &str, fields: &[(&str, Value)]) {
        tracing::info!(event, fields = %fields_json(fields));
    }

    fn warning(&self, event: &str, fields: &[(&str, Value)]) {
        tracing::warn!(event, fields = %fields_json(fields));
    }

    fn error(&self, event: &str, fields: &[(&str, Value)]) {
        tracing::error!(event, fields = %fields_json(fields));
    }

    fn critical(&self, event: &str, fields: &[(&str, Value)]) {
        tracing::error!(event, critical = true, fields = %fields_json(fields));
    }
}

/// The telemetry pair the client holds.
pub type Telemetry = (Arc<dyn Tracer>, Arc<dyn Logger>);

/// Build the telemetry pair.
///
/// Disabled telemetry yields the no-op pair, so call sites never branch.
pub fn get_telemetry(enabled: bool) -> Telemetry {
    if enabled {
        (Arc::new(TracingTracer), Arc::new(TracingLogger))
    } else {
        (Arc::new(NoopTracer), Arc::new(NoopLogger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_pair_accepts_everything() {
        let (tracer, logger) = get_telemetry(false);
        let span = tracer.start_span("test.op");
        span.set_attribute("k", json!(1));
        span.record_exception(&PynectorError::Cancelled);
        span.set_status(SpanStatus::Error);
        logger.info("test.event", &[("count", json!(3))]);
        logger.error("test.event", &[]);
    }

    #[test]
    fn test_tracing_span_collects_attributes() {
        let span = TracingSpan::new("test.op");
        span.set_attribute("request.size", json!(128));
        span.record_exception(&PynectorError::Timeout(1.5));
        let state = span.state.lock().unwrap();
        assert_eq!(state.attributes.len(), 2);
        assert_eq!(state.status, SpanStatus::Error);
    }

    #[test]
    fn test_concurrent_attribute_writes() {
        let span = Arc::new(TracingSpan::new("test.op"));
        let mut handles = Vec::new();
        for i in 0..8 {
            let span = Arc::clone(&span);
            handles.push(std::thread::spawn(move || {
                span.set_attribute("i", json!(i));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(span.state.lock().unwrap().attributes.len(), 8);
    }
}
