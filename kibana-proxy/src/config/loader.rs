//! Configuration file loading

use super::schema::Config;
use super::validator::ConfigValidator;
use crate::error::{ProxyError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Find the user config by checking environment and standard locations
    pub fn find_user_config() -> Option<PathBuf> {
        // 1. $KIBANA_PROXY_CONFIG
        if let Ok(path) = env::var("KIBANA_PROXY_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. $XDG_CONFIG_HOME/kibana-proxy/config.toml
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            let p = PathBuf::from(xdg).join("kibana-proxy/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        // 3. ~/.config/kibana-proxy/config.toml
        if let Ok(home) = env::var("HOME") {
            let p = PathBuf::from(home).join(".config/kibana-proxy/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        None
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ProxyError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse config from TOML text
    pub fn parse(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load config from an explicit path, the user config, or defaults.
    /// The result is validated before it is returned.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
        let config = match path.or_else(Self::find_user_config) {
            Some(p) => {
                tracing::debug!("Loading config from {:?}", p);
                Self::load_from_file(&p)?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        };

        ConfigValidator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen, "127.0.0.1:5602");
        assert_eq!(config.tenancy.default_index, "hopsworks");
        assert_eq!(config.upstream.timeout_secs, 30);
        assert!(!config.logging.log_requests);
        assert!(config.membership.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:8080"
mount_path = "/kibana"

[upstream]
url = "http://kibana.internal:5601"
timeout_secs = 5

[tenancy]
default_index = "default"
bypass_principal = "admin@example.com"

[logging]
log_requests = true

[membership]
"alice@example.com" = ["proj_a"]
"bob@example.com" = ["proj_b", "proj_c"]
"#;

        let config = ConfigLoader::parse(toml_str).unwrap();
        assert_eq!(config.server.mount_path, "/kibana");
        assert_eq!(config.upstream.url, "http://kibana.internal:5601");
        assert_eq!(config.tenancy.bypass_principal, "admin@example.com");
        assert!(config.logging.log_requests);
        assert_eq!(config.membership["bob@example.com"].len(), 2);
        // Unset sections keep their defaults
        assert_eq!(config.identity.header, "x-remote-user");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[tenancy]\ndefault_index = \"shared\"").unwrap();

        let config = ConfigLoader::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.tenancy.default_index, "shared");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConfigLoader::load_from_file("/nonexistent/kibana-proxy.toml");
        assert!(matches!(result, Err(ProxyError::ConfigLoad { .. })));
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[upstream]\nurl = \"not a url\"").unwrap();

        let result = ConfigLoader::load_or_default(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ProxyError::Validation(_))));
    }
}
