use std::path::PathBuf;

/// Server settings read from `TALOYHTIO_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the default, with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("TALOYHTIO_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "TALOYHTIO_PORT").unwrap_or(defaults.port),
            data_dir: lookup("TALOYHTIO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed(&lookup, "TALOYHTIO_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "TALOYHTIO_METRICS_PORT"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("taloyhtio.wal")
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = config(&[]);
        assert_eq!(c, ServerConfig::default());
        assert_eq!(c.addr(), "0.0.0.0:8080");
        assert_eq!(c.wal_path(), PathBuf::from("./data/taloyhtio.wal"));
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("TALOYHTIO_BIND", "127.0.0.1"),
            ("TALOYHTIO_PORT", "3000"),
            ("TALOYHTIO_DATA_DIR", "/var/lib/taloyhtio"),
            ("TALOYHTIO_COMPACT_THRESHOLD", "50"),
            ("TALOYHTIO_METRICS_PORT", "9100"),
        ]);
        assert_eq!(c.addr(), "127.0.0.1:3000");
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/taloyhtio/taloyhtio.wal"));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let c = config(&[("TALOYHTIO_PORT", "eighty"), ("TALOYHTIO_METRICS_PORT", "")]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.metrics_port, None);
    }
}
