// Central, typed runtime configuration loaded from the environment.

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub lease_ms: i64,
    pub poll_ms: u64,
    pub heartbeat_ms: u64,
    pub recovery_interval_ms: u64,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("QUEUEFLOW_WORKER_ID", "WORKER_ID")
            .unwrap_or_else(|| format!("host_{}", random_hex(8)));

        // §6.4 defaults: leaseMs 60_000, pollMs 250.
        let lease_ms = env_or_fallback("QUEUEFLOW_LEASE_MS", "LEASE_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60_000);

        let poll_ms = env_or_fallback("QUEUEFLOW_POLL_MS", "POLL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(250);

        let heartbeat_ms = env_or_fallback("QUEUEFLOW_HEARTBEAT_MS", "HEARTBEAT_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        let recovery_interval_ms = env_or_fallback("QUEUEFLOW_RECOVERY_INTERVAL_MS", "RECOVERY_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);

        let migrate_on_startup = env_bool("QUEUEFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            lease_ms,
            poll_ms,
            heartbeat_ms,
            recovery_interval_ms,
            migrate_on_startup,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn random_hex(bytes: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
}
