//! Load run configuration loaded from environment variables.

/// Load generator settings.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string; the in-memory store is used when unset
/// - `LOADGEN_ORDERS`: number of orders to submit (default: `200`)
/// - `LOADGEN_CONCURRENCY`: orders in flight at once (default: `16`)
/// - `LOADGEN_MAX_QUANTITY`: each order asks for 1 to this many burgers (default: `3`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for plain text
#[derive(Debug, Clone)]
pub struct LoadgenConfig {
    pub database_url: Option<String>,
    pub orders: usize,
    pub concurrency: usize,
    pub max_quantity: i64,
    pub json_logs: bool,
}

impl LoadgenConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            orders: lookup("LOADGEN_ORDERS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.orders),
            concurrency: lookup("LOADGEN_CONCURRENCY")
                .and_then(|v| v.trim().parse().ok())
                .filter(|c: &usize| *c > 0)
                .unwrap_or(defaults.concurrency),
            max_quantity: lookup("LOADGEN_MAX_QUANTITY")
                .and_then(|v| v.trim().parse().ok())
                .filter(|q: &i64| *q > 0)
                .unwrap_or(defaults.max_quantity),
            json_logs: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        }
    }

    /// Name of the store backend this run will use.
    pub fn backend(&self) -> &'static str {
        if self.database_url.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }

    /// Connection pool size: one per in-flight order plus headroom for seeding.
    pub fn pool_size(&self) -> u32 {
        u32::try_from(self.concurrency + 2).unwrap_or(u32::MAX)
    }
}

impl Default for LoadgenConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            orders: 200,
            concurrency: 16,
            max_quantity: 3,
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> LoadgenConfig {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        LoadgenConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.database_url, None);
        assert_eq!(config.orders, 200);
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.max_quantity, 3);
        assert!(!config.json_logs);
        assert_eq!(config.backend(), "memory");
    }

    #[test]
    fn test_postgres_backend_and_json_logs() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/ordering"),
            ("LOADGEN_CONCURRENCY", "8"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(config.backend(), "postgres");
        assert_eq!(config.pool_size(), 10);
        assert!(config.json_logs);
    }

    #[test]
    fn test_zero_and_garbage_fall_back() {
        let config = from_pairs(&[
            ("DATABASE_URL", "  "),
            ("LOADGEN_CONCURRENCY", "0"),
            ("LOADGEN_MAX_QUANTITY", "-2"),
            ("LOADGEN_ORDERS", "lots"),
        ]);
        assert_eq!(config.backend(), "memory");
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.max_quantity, 3);
        assert_eq!(config.orders, 200);
    }
}
