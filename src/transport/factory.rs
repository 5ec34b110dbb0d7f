//! Transport factories and the option-merge law.
//!
//! A factory closes over default options; `create_transport` deep-merges
//! per-call overrides on top of those defaults. The `"headers"` object
//! merges key-wise, everything else overwrites whole.

use crate::error::Result;
use crate::transport::{RequestOptions, Transport};

/// Produces configured transports from defaults plus per-call overrides.
pub trait TransportFactory: Send + Sync {
    /// Create a transport with `overrides` merged over the factory's
    /// defaults per [`merge_options`].
    fn create_transport(&self, overrides: &RequestOptions) -> Result<Box<dyn Transport>>;

    /// Human-readable backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Merge `overrides` over `base`.
///
/// The `"headers"` key is merged key-wise when both sides hold JSON
/// objects (override keys win); every other key overwrites the base value.
pub fn merge_options(base: &RequestOptions, overrides: &RequestOptions) -> RequestOptions {
    let mut merged = base.clone();
    for (key, value) in overrides {
        let combined = match (key.as_str(), merged.get(key).cloned(), value) {
            ("headers", Some(serde_json::Value::Object(mut base_headers)), serde_json::Value::Object(over)) => {
                for (k, v) in over {
                    base_headers.insert(k.clone(), v.clone());
                }
                serde_json::Value::Object(base_headers)
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(pairs: &[(&str, serde_json::Value)]) -> RequestOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_scalars_overwrite() {
        let base = options(&[("timeout", json!(10.0)), ("base_url", json!("http://a"))]);
        let overrides = options(&[("timeout", json!(5.0))]);
        let merged = merge_options(&base, &overrides);
        assert_eq!(merged["timeout"], json!(5.0));
        assert_eq!(merged["base_url"], json!("http://a"));
    }

    #[test]
    fn test_merge_headers_keywise() {
        let base = options(&[(
            "headers",
            json!({"User-Agent": "pynector/0.1", "Accept": "application/json"}),
        )]);
        let overrides = options(&[("headers", json!({"Accept": "text/plain", "X-Extra": "1"}))]);
        let merged = merge_options(&base, &overrides);
        assert_eq!(
            merged["headers"],
            json!({
                "User-Agent": "pynector/0.1",
                "Accept": "text/plain",
                "X-Extra": "1"
            })
        );
    }

    #[test]
    fn test_merge_headers_absent_in_base() {
        let base = options(&[]);
        let overrides = options(&[("headers", json!({"X-Only": "yes"}))]);
        let merged = merge_options(&base, &overrides);
        assert_eq!(merged["headers"], json!({"X-Only": "yes"}));
    }

    #[test]
    fn test_merge_empty_overrides_is_identity() {
        let base = options(&[("k", json!("v"))]);
        let merged = merge_options(&base, &options(&[]));
        assert_eq!(merged, base);
    }
}
