//! Environment configuration collaborator.
//!
//! The client resolves options from its instance config first, then from
//! process environment variables with the `PYNECTOR_` prefix, then falls
//! back to the caller's default.

/// Environment variable prefix for all client configuration keys.
pub const ENV_PREFIX: &str = "PYNECTOR_";

/// Look up a configuration key in the process environment.
///
/// The key is upcased and prefixed, so `get_env_config("timeout")` reads
/// `PYNECTOR_TIMEOUT`. Returns `None` when unset or not valid unicode.
pub fn get_env_config(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key.to_uppercase())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_lookup_prefixed_and_upcased() {
        std::env::set_var("PYNECTOR_TEST_LOOKUP", "42");
        assert_eq!(get_env_config("test_lookup").as_deref(), Some("42"));
        std::env::remove_var("PYNECTOR_TEST_LOOKUP");
    }

    #[test]
    fn test_env_lookup_missing() {
        assert_eq!(get_env_config("definitely_not_set_anywhere"), None);
    }
}
