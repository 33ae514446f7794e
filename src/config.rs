//! Process configuration: bind address, database DSN, and the tunables
//! spec §9 calls out (schedule horizon, status-push cadence). CLI flags
//! with environment-variable fallbacks, in the style the pack's indexer
//! binaries use (`clap::Parser` derive, `#[arg(long, env, default_value)]`)
//! rather than hand-rolled `env::var` parsing.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "isu-room-server", about = "Concurrency core for a shared-room idle/clicker game")]
pub struct ServerConfig {
    /// Address the websocket listener binds to.
    #[arg(long, env = "ISU_BIND_ADDR", default_value = "0.0.0.0:5000")]
    pub bind_addr: String,

    /// Postgres connection string, e.g. `host=... user=... dbname=isudb`.
    #[arg(long, env = "ISU_DATABASE_URL", default_value = "host=127.0.0.1 user=isucon dbname=isudb")]
    pub database_url: String,

    /// Maximum number of pooled Postgres connections.
    #[arg(long, env = "ISU_DB_POOL_SIZE", default_value_t = 16)]
    pub db_pool_size: usize,

    /// Interval between unsolicited status pushes on an idle socket, in
    /// milliseconds (spec §4.7's "500 ms").
    #[arg(long, env = "ISU_STATUS_PUSH_MS", default_value_t = 500)]
    pub status_push_ms: u64,

    /// `RUST_LOG`-style filter directive; falls back to `info` if unset
    /// and `RUST_LOG` is also unset.
    #[arg(long, env = "ISU_LOG", default_value = "info")]
    pub log_filter: String,

    /// Run schema bootstrap (`CREATE TABLE IF NOT EXISTS ...`) before
    /// serving. Safe to leave on; migrations are idempotent.
    #[arg(long, env = "ISU_MIGRATE_ON_START", default_value_t = true)]
    pub migrate_on_start: bool,
}

impl ServerConfig {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn status_push_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.status_push_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_with_no_arguments() {
        let config = ServerConfig::parse_from(["isu-room-server"]);
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.status_push_ms, 500);
        assert!(config.migrate_on_start);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::parse_from([
            "isu-room-server",
            "--bind-addr",
            "127.0.0.1:9000",
            "--status-push-ms",
            "250",
        ]);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.status_push_interval(), std::time::Duration::from_millis(250));
    }
}
