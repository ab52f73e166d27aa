//! Server configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::session::SessionDirectory;
use crate::store::{JsonStore, Store};
use tracing::warn;

pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_SWEEP_SECS: u64 = 300;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the CommonIO server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port for HTTP and WebSocket traffic
    pub port: u16,
    /// Directory holding the store snapshot
    pub data_dir: PathBuf,
    /// Directory served as static files
    pub static_dir: PathBuf,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Idle time after which a disconnected session is evicted
    pub session_ttl: chrono::Duration,
    /// How often the session sweeper runs
    pub sweep_interval: Duration,
    /// bcrypt work factor for stored passwords
    pub bcrypt_cost: u32,
}

/// Log directory from `COMMONIO_LOGS`, needed before the rest of the config
/// so that config warnings reach the log.
pub fn log_dir_from_env() -> PathBuf {
    env_or("COMMONIO_LOGS", PathBuf::from("logs"))
}

/// Session TTL in seconds; negative or out of range falls back to the default.
pub fn session_ttl_from_secs(secs: i64) -> chrono::Duration {
    match chrono::Duration::try_seconds(secs) {
        Some(ttl) if secs >= 0 => ttl,
        _ => {
            warn!(
                "COMMONIO_SESSION_TTL_SECS={} is not a valid TTL, using {}",
                secs, DEFAULT_SESSION_TTL_SECS
            );
            chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS)
        }
    }
}

/// Sweep period in seconds; zero falls back to the default.
pub fn sweep_interval_from_secs(secs: u64) -> Duration {
    if secs == 0 {
        warn!(
            "COMMONIO_SWEEP_SECS=0 would stop the session sweeper, using {}",
            DEFAULT_SWEEP_SECS
        );
        return Duration::from_secs(DEFAULT_SWEEP_SECS);
    }
    Duration::from_secs(secs)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: env_or("COMMONIO_PORT", 8100),
            data_dir: env_or("COMMONIO_DATA", PathBuf::from("data")),
            static_dir: env_or("COMMONIO_STATIC", PathBuf::from("public")),
            log_dir: log_dir_from_env(),
            session_ttl: session_ttl_from_secs(env_or(
                "COMMONIO_SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )),
            sweep_interval: sweep_interval_from_secs(env_or(
                "COMMONIO_SWEEP_SECS",
                DEFAULT_SWEEP_SECS,
            )),
            bcrypt_cost: env_or("COMMONIO_BCRYPT_COST", bcrypt::DEFAULT_COST),
        }
    }
}

impl ServerConfig {
    /// Create config with all directories under `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        let base = base_dir.into();
        config.data_dir = base.join("data");
        config.static_dir = base.join("public");
        config.log_dir = base.join("logs");
        config
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(&self.static_dir).await?;
        tokio::fs::create_dir_all(&self.log_dir).await?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database.json")
    }
}

/// App state shared by the gateway and all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionDirectory>,
    pub presence: Arc<PresenceRegistry>,
    pub router: Arc<MessageRouter>,
}

impl AppState {
    /// Open the JSON store from `config` and build fresh registries.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.ensure_dirs().await?;
        let store = JsonStore::open(config.database_path(), config.bcrypt_cost).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: ServerConfig, store: Arc<dyn Store>) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let sessions = Arc::new(SessionDirectory::new(presence.clone()));
        let router = Arc::new(MessageRouter::new(sessions.clone()));
        Self {
            config,
            store,
            sessions,
            presence,
            router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_ttl_falls_back_to_default() {
        assert_eq!(
            session_ttl_from_secs(-5),
            chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS)
        );
        assert_eq!(
            session_ttl_from_secs(i64::MAX),
            chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS)
        );
        assert_eq!(session_ttl_from_secs(0), chrono::Duration::zero());
        assert_eq!(session_ttl_from_secs(60), chrono::Duration::seconds(60));
    }

    #[test]
    fn test_zero_sweep_interval_falls_back_to_default() {
        assert_eq!(
            sweep_interval_from_secs(0),
            Duration::from_secs(DEFAULT_SWEEP_SECS)
        );
        assert_eq!(sweep_interval_from_secs(5), Duration::from_secs(5));
    }

    #[test]
    fn test_base_dir_layout() {
        let config = ServerConfig::with_base_dir("/srv/commonio");
        assert_eq!(config.data_dir, PathBuf::from("/srv/commonio/data"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/srv/commonio/data/database.json")
        );
        assert!(config.sweep_interval > Duration::ZERO);
    }
}
