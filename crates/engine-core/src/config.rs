//! `EngineConfig`: a single struct loaded once at startup from environment
//! variables, env-first with documented defaults (spec §6, §10), rather than
//! the original system's `pydantic_settings.BaseSettings` class. `.env`
//! loading (via `dotenvy`) happens once in the binary before this is built;
//! this module only ever reads `std::env`.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    InProcess,
    Durable,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,

    pub llm_provider: String,
    pub llm_model: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,

    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,

    pub max_revisions: u32,
    pub graph_timeout_seconds: u64,
    pub rate_limit_rpm: u32,

    pub max_task_depth: u32,
    pub max_child_tasks_per_task: u32,
    pub max_total_auto_tasks: u32,
    pub allow_auto_task_creation: bool,

    pub ws_heartbeat_interval_seconds: u64,
    pub broadcast_error_delay_seconds: u64,
    pub max_broadcast_error_count: u32,

    pub use_queue: bool,
    pub interrupt_mode: InterruptMode,

    pub log_dir: String,
    pub log_retention_days: u64,
}

impl EngineConfig {
    /// Load from the process environment, falling back to the documented
    /// defaults (spec §6) for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            host: env_string("HOST", "127.0.0.1"),
            port: env_parse("PORT", 8080),

            llm_provider: env_string("LLM_PROVIDER", "stub"),
            llm_model: env_string("LLM_MODEL", "stub-model"),
            openai_api_key: env_secret("OPENAI_API_KEY"),
            anthropic_api_key: env_secret("ANTHROPIC_API_KEY"),
            google_api_key: env_secret("GOOGLE_API_KEY"),

            storage_backend: match env_string("STORAGE_BACKEND", "memory").as_str() {
                "postgres" => StorageBackend::Postgres,
                _ => StorageBackend::Memory,
            },
            database_url: env_secret("DATABASE_URL"),

            max_revisions: env_parse("MAX_REVISIONS", 3),
            graph_timeout_seconds: env_parse("GRAPH_TIMEOUT_SECONDS", 600),
            rate_limit_rpm: env_parse("RATE_LIMIT_RPM", 60),

            max_task_depth: env_parse("MAX_TASK_DEPTH", 3),
            max_child_tasks_per_task: env_parse("MAX_CHILD_TASKS_PER_TASK", 5),
            max_total_auto_tasks: env_parse("MAX_TOTAL_AUTO_TASKS", 20),
            allow_auto_task_creation: env_parse("ALLOW_AUTO_TASK_CREATION", true),

            ws_heartbeat_interval_seconds: env_parse("WS_HEARTBEAT_INTERVAL", 30),
            broadcast_error_delay_seconds: env_parse("BROADCAST_ERROR_DELAY", 5),
            max_broadcast_error_count: env_parse("MAX_BROADCAST_ERROR_COUNT", 5),

            use_queue: env_parse("USE_QUEUE", false),
            interrupt_mode: match env_string("INTERRUPT_MODE", "in_process").as_str() {
                "durable" => InterruptMode::Durable,
                _ => InterruptMode::InProcess,
            },

            log_dir: env_string("LOG_DIR", "logs"),
            log_retention_days: env_parse("LOG_RETENTION_DAYS", 14),
        }
    }

    pub fn graph_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_timeout_seconds)
    }

    pub fn broadcast_error_delay(&self) -> Duration {
        Duration::from_secs(self.broadcast_error_delay_seconds)
    }

    pub fn ws_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_interval_seconds)
    }

    /// Resolve a provider's default key, for use as the server-side fallback
    /// behind `RequestContext::key_for` (BYOK headers take precedence).
    pub fn default_key_for(&self, provider: &str) -> Option<&str> {
        match provider {
            "openai" => self.openai_api_key.as_deref(),
            "anthropic" => self.anthropic_api_key.as_deref(),
            "google" => self.google_api_key.as_deref(),
            _ => None,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_secret(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // Clear any leakage from the test process environment so this is
        // deterministic regardless of run order.
        for key in ["MAX_REVISIONS", "GRAPH_TIMEOUT_SECONDS", "RATE_LIMIT_RPM"] {
            env::remove_var(key);
        }
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.max_revisions, 3);
        assert_eq!(cfg.graph_timeout_seconds, 600);
        assert_eq!(cfg.rate_limit_rpm, 60);
        assert_eq!(cfg.max_task_depth, 3);
        assert_eq!(cfg.max_child_tasks_per_task, 5);
        assert_eq!(cfg.max_total_auto_tasks, 20);
        assert!(cfg.allow_auto_task_creation);
    }
}
