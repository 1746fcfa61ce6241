use serde::{Deserialize, Serialize};

/// Per-request credential carrier, captured explicitly at API entry and
/// passed as an argument into every spawned background unit. Never stored
/// as implicit/thread-local state: fan-out children receive an owned copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub openai_key: Option<String>,
    pub anthropic_key: Option<String>,
    pub google_key: Option<String>,
}

impl RequestContext {
    pub fn from_headers(
        openai: Option<String>,
        anthropic: Option<String>,
        google: Option<String>,
    ) -> Self {
        Self {
            openai_key: non_empty(openai),
            anthropic_key: non_empty(anthropic),
            google_key: non_empty(google),
        }
    }

    /// Resolve the effective key for a provider family, given the request's
    /// BYOK override and the server's configured default.
    pub fn key_for(&self, provider: &str, server_default: Option<&str>) -> Option<String> {
        let override_key = match provider {
            "openai" => self.openai_key.as_deref(),
            "anthropic" => self.anthropic_key.as_deref(),
            "google" => self.google_key.as_deref(),
            _ => None,
        };
        override_key
            .or(server_default)
            .map(|s| s.to_string())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byok_override_takes_precedence() {
        let ctx = RequestContext::from_headers(Some("request-key".into()), None, None);
        assert_eq!(
            ctx.key_for("openai", Some("server-default")),
            Some("request-key".to_string())
        );
    }

    #[test]
    fn falls_back_to_server_default() {
        let ctx = RequestContext::default();
        assert_eq!(
            ctx.key_for("openai", Some("server-default")),
            Some("server-default".to_string())
        );
    }

    #[test]
    fn blank_header_is_ignored() {
        let ctx = RequestContext::from_headers(Some("   ".into()), None, None);
        assert_eq!(ctx.key_for("openai", Some("server-default")), Some("server-default".to_string()));
    }
}
