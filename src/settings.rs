use std::path::PathBuf;

use tracing::warn;

use crate::secret::HashCost;

/// Runtime settings, read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    /// Directory for the in-memory store's JSON snapshot; unset keeps state in memory only.
    pub data_dir: Option<PathBuf>,
    pub frontend_url: Option<String>,
    pub hash_cost: HashCost,
}

fn parsed_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{name}='{raw}' is not valid, using default");
            default
        }),
        Err(_) => default,
    }
}

fn opt_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = HashCost::default();
        Self {
            bind_addr: opt_env("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed_env("PORT", 8080),
            database_url: opt_env("DATABASE_URL"),
            data_dir: opt_env("BOARD_DATA_DIR").map(PathBuf::from),
            frontend_url: opt_env("FRONTEND_URL"),
            hash_cost: HashCost {
                memory_kib: parsed_env("SECRET_HASH_MEMORY_KIB", defaults.memory_kib),
                iterations: parsed_env("SECRET_HASH_ITERATIONS", defaults.iterations),
                parallelism: parsed_env("SECRET_HASH_PARALLELISM", defaults.parallelism),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn defaults_when_unset() {
        for var in ["BIND_ADDR", "PORT", "DATABASE_URL", "BOARD_DATA_DIR", "FRONTEND_URL", "SECRET_HASH_MEMORY_KIB"] {
            std::env::remove_var(var);
        }
        let cfg = Settings::from_env();
        assert_eq!(cfg.bind_addr, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert!(cfg.database_url.is_none());
        assert!(cfg.data_dir.is_none());
        assert_eq!(cfg.hash_cost, HashCost::default());
    }

    #[test]
    #[serial_test::serial]
    fn bad_numbers_fall_back() {
        std::env::set_var("PORT", "eighty");
        std::env::set_var("SECRET_HASH_MEMORY_KIB", "4096");
        let cfg = Settings::from_env();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.hash_cost.memory_kib, 4096);
        std::env::remove_var("PORT");
        std::env::remove_var("SECRET_HASH_MEMORY_KIB");
    }
}
