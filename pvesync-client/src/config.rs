use std::fmt;
use std::time::Duration;

/// Connection settings for one platform endpoint.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://pve1.example.com:8006`.
    pub endpoint: String,
    /// Pre-issued API token in `user@realm!tokenid=secret` form.
    pub api_token: String,
    /// Accept self-signed certificates.
    pub insecure_tls: bool,
    /// Upper bound for a single HTTP request.
    pub request_timeout: Duration,
    /// Interval between task status polls.
    pub task_poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: api_token.into(),
            insecure_tls: false,
            request_timeout: Duration::from_secs(60),
            task_poll_interval: Duration::from_secs(1),
        }
    }
}

// Keeps the token secret out of logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("api_token", &"<redacted>")
            .field("insecure_tls", &self.insecure_tls)
            .field("request_timeout", &self.request_timeout)
            .field("task_poll_interval", &self.task_poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::new("https://pve:8006", "root@pam!ci=s3cr3t");
        let out = format!("{config:?}");
        assert!(out.contains("https://pve:8006"));
        assert!(!out.contains("s3cr3t"));
    }
}
