use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use anyhow::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    pub server: UpstreamConfig,
    #[serde(default)]
    pub output: OutputConfig,
    pub script: Option<ScriptConfig>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub url: String,
}

/// The directory server that intercepted traffic is forwarded to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    /// Use TLS for the upstream leg (ldaps).
    pub use_tls: Option<bool>,
    /// Skip upstream certificate verification (only for tests/internal networks).
    pub skip_verify: Option<bool>,
    /// Extra CA bundle for verifying the upstream certificate.
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Decode log destination; stdout when absent.
    pub log_file: Option<String>,
    /// Include a hex dump of every message in the decode log.
    #[serde(default)]
    pub raw_bytes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Path the generated SLAMD script is written to.
    pub file: String,
}

/// Listener-side TLS (ldaps:// clients).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig {
                url: "ldap://127.0.0.1:1389".to_string(),
            },
            server: UpstreamConfig {
                host: "127.0.0.1".to_string(),
                port: 389,
                use_tls: Some(false),
                skip_verify: Some(false),
                ca_file: None,
            },
            output: OutputConfig::default(),
            script: None,
            tls: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.listen.url, "ldap://127.0.0.1:1389");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 389);
        assert!(!config.output.raw_bytes);
        assert!(config.script.is_none());
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_config_from_str() {
        let yaml = r#"
listen:
  url: "ldap://0.0.0.0:1389"
server:
  host: "ldap.example.com"
  port: 636
  use_tls: true
  skip_verify: true
output:
  log_file: "/var/log/decode.log"
  raw_bytes: true
script:
  file: "/var/log/capture.script"
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.listen.url, "ldap://0.0.0.0:1389");
        assert_eq!(config.server.host, "ldap.example.com");
        assert_eq!(config.server.port, 636);
        assert_eq!(config.server.use_tls, Some(true));
        assert_eq!(config.server.skip_verify, Some(true));
        assert_eq!(config.output.log_file, Some("/var/log/decode.log".to_string()));
        assert!(config.output.raw_bytes);
        assert_eq!(config.script.as_ref().unwrap().file, "/var/log/capture.script");
    }

    #[test]
    fn test_config_from_str_minimal() {
        let yaml = r#"
listen:
  url: "ldap://:1389"
server:
  host: "localhost"
  port: 389
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.listen.url, "ldap://:1389");
        assert_eq!(config.server.use_tls, None);
        assert_eq!(config.output.log_file, None);
        assert!(!config.output.raw_bytes);
    }

    #[test]
    fn test_config_with_listener_tls() {
        let yaml = r#"
listen:
  url: "ldaps://0.0.0.0:1636"
server:
  host: "ldap.example.com"
  port: 389
tls:
  cert_file: "/etc/ssl/cert.pem"
  key_file: "/etc/ssl/key.pem"
"#;
        let config = Config::from_str(yaml).unwrap();
        let tls = config.tls.as_ref().unwrap();
        assert_eq!(tls.cert_file, "/etc/ssl/cert.pem");
        assert_eq!(tls.key_file, "/etc/ssl/key.pem");
    }

    #[test]
    fn test_config_from_file() {
        let yaml = r#"
listen:
  url: "ldap://127.0.0.1:1389"
server:
  host: "localhost"
  port: 10389
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.listen.url, "ldap://127.0.0.1:1389");
        assert_eq!(config.server.port, 10389);
    }

    #[test]
    fn test_config_from_str_invalid_yaml() {
        let yaml = "invalid: yaml: content: [";
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn test_config_from_file_nonexistent() {
        assert!(Config::from_file("/nonexistent/path/config.yaml").is_err());
    }
}
