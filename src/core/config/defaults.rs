use crate::core::config::data::Config;
use std::time::Duration;

pub const DEFAULT_LOG_FILTER: &str = "forkchat=info";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Keys accepted by `forkchat set` / `forkchat unset`.
pub const CONFIG_KEYS: &[&str] = &["backend-url", "client-id", "log-filter", "request-timeout"];

impl Config {
    pub fn log_filter_or_default(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Backend coordinates, when both halves are configured.
    pub fn backend(&self) -> Option<(&str, &str)> {
        Some((self.backend_url.as_deref()?, self.client_id.as_deref()?))
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        if value.is_empty() {
            return Err(format!("Value for {key} must not be empty"));
        }
        match key {
            "backend-url" => self.backend_url = Some(value.to_string()),
            "client-id" => self.client_id = Some(value.to_string()),
            "log-filter" => self.log_filter = Some(value.to_string()),
            "request-timeout" => {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| format!("request-timeout expects whole seconds, got {value}"))?;
                if secs == 0 {
                    return Err("request-timeout must be at least 1 second".to_string());
                }
                self.request_timeout_secs = Some(secs);
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), String> {
        match key {
            "backend-url" => self.backend_url = None,
            "client-id" => self.client_id = None,
            "log-filter" => self.log_filter = None,
            "request-timeout" => self.request_timeout_secs = None,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> String {
    format!("Unknown config key: {key}. Available keys: {}", CONFIG_KEYS.join(", "))
}
