//! Client and proxy configuration

use crate::messages::NewProxy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Proxy name cannot be empty")]
    EmptyName,

    #[error("Proxy {0} is defined more than once")]
    DuplicateName(String),

    #[error("Proxy {0} has no local_port")]
    InvalidLocalPort(String),
}

/// Protocol-specific proxy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// TCP port forwarding - port is allocated by the server if 0
    Tcp {
        #[serde(default)]
        remote_port: u16,
    },
    /// UDP port forwarding - port is allocated by the server if 0
    Udp {
        #[serde(default)]
        remote_port: u16,
    },
    /// HTTP with host-based routing
    Http {
        #[serde(default)]
        custom_domains: Vec<String>,
        #[serde(default)]
        subdomain: Option<String>,
        #[serde(default)]
        locations: Vec<String>,
    },
    /// HTTPS with host-based routing
    Https {
        #[serde(default)]
        custom_domains: Vec<String>,
        #[serde(default)]
        subdomain: Option<String>,
    },
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Tcp { .. } => "tcp",
            ProxyType::Udp { .. } => "udp",
            ProxyType::Http { .. } => "http",
            ProxyType::Https { .. } => "https",
        }
    }

    /// Equality that ignores the order of domain and location lists
    fn semantically_eq(&self, other: &ProxyType) -> bool {
        fn set(v: &[String]) -> BTreeSet<&str> {
            v.iter().map(String::as_str).collect()
        }

        match (self, other) {
            (ProxyType::Tcp { remote_port: a }, ProxyType::Tcp { remote_port: b })
            | (ProxyType::Udp { remote_port: a }, ProxyType::Udp { remote_port: b }) => a == b,
            (
                ProxyType::Http {
                    custom_domains: d1,
                    subdomain: s1,
                    locations: l1,
                },
                ProxyType::Http {
                    custom_domains: d2,
                    subdomain: s2,
                    locations: l2,
                },
            ) => set(d1) == set(d2) && s1 == s2 && set(l1) == set(l2),
            (
                ProxyType::Https {
                    custom_domains: d1,
                    subdomain: s1,
                },
                ProxyType::Https {
                    custom_domains: d2,
                    subdomain: s2,
                },
            ) => set(d1) == set(d2) && s1 == s2,
            _ => false,
        }
    }
}

/// Configuration of a single proxy (one tunnel)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub name: String,
    pub kind: ProxyType,
    #[serde(default = "default_local_ip")]
    pub local_ip: String,
    #[serde(default)]
    pub local_port: u16,
    #[serde(default)]
    pub use_encryption: bool,
    #[serde(default)]
    pub use_compression: bool,
    /// e.g. "1MB"; passed to the server untouched
    #[serde(default)]
    pub bandwidth_limit: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub metas: BTreeMap<String, String>,
}

fn default_local_ip() -> String {
    "127.0.0.1".to_string()
}

impl ProxyConfig {
    pub fn new(name: impl Into<String>, kind: ProxyType, local_port: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            local_ip: default_local_ip(),
            local_port,
            use_encryption: false,
            use_compression: false,
            bandwidth_limit: None,
            group: None,
            group_key: None,
            metas: BTreeMap::new(),
        }
    }

    pub fn tcp(name: impl Into<String>, local_port: u16, remote_port: u16) -> Self {
        Self::new(name, ProxyType::Tcp { remote_port }, local_port)
    }

    pub fn http(name: impl Into<String>, local_port: u16, custom_domains: Vec<String>) -> Self {
        Self::new(
            name,
            ProxyType::Http {
                custom_domains,
                subdomain: None,
                locations: Vec::new(),
            },
            local_port,
        )
    }

    pub fn with_local_ip(mut self, local_ip: impl Into<String>) -> Self {
        self.local_ip = local_ip.into();
        self
    }

    /// Address of the local service this proxy exposes
    pub fn local_addr(&self) -> String {
        format!("{}:{}", self.local_ip, self.local_port)
    }

    /// Whether `other` describes the same tunnel.
    ///
    /// Every field that ends up in the server-side registration takes part.
    /// Domain and location lists compare as sets.
    pub fn compare(&self, other: &ProxyConfig) -> bool {
        self.name == other.name
            && self.kind.semantically_eq(&other.kind)
            && self.local_ip == other.local_ip
            && self.local_port == other.local_port
            && self.use_encryption == other.use_encryption
            && self.use_compression == other.use_compression
            && self.bandwidth_limit == other.bandwidth_limit
            && self.group == other.group
            && self.group_key == other.group_key
            && self.metas == other.metas
    }

    /// Build the registration message the server expects for this proxy
    pub fn to_new_proxy(&self) -> NewProxy {
        let mut msg = NewProxy {
            proxy_name: self.name.clone(),
            proxy_type: self.kind.as_str().to_string(),
            use_encryption: self.use_encryption,
            use_compression: self.use_compression,
            bandwidth_limit: self.bandwidth_limit.clone(),
            group: self.group.clone(),
            group_key: self.group_key.clone(),
            metas: self.metas.clone(),
            ..Default::default()
        };

        match &self.kind {
            ProxyType::Tcp { remote_port } | ProxyType::Udp { remote_port } => {
                msg.remote_port = Some(*remote_port);
            }
            ProxyType::Http {
                custom_domains,
                subdomain,
                locations,
            } => {
                msg.custom_domains = custom_domains.clone();
                msg.subdomain = subdomain.clone();
                msg.locations = locations.clone();
            }
            ProxyType::Https {
                custom_domains,
                subdomain,
            } => {
                msg.custom_domains = custom_domains.clone();
                msg.subdomain = subdomain.clone();
            }
        }

        msg
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.local_port == 0 {
            return Err(ConfigError::InvalidLocalPort(self.name.clone()));
        }
        Ok(())
    }
}

/// Client-wide settings shared by every proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientCommonConfig {
    pub server_addr: String,
    pub server_port: u16,
    pub user: Option<String>,
    /// Number of work connections the server may pre-establish
    pub pool_count: u32,
    /// Delay before a proxy rejected by the server is announced again
    pub start_retry_interval_secs: u64,
    /// Capacity of the outgoing control message queue
    pub message_queue_capacity: usize,
    pub log_level: String,
}

impl Default for ClientCommonConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1".to_string(),
            server_port: 7000,
            user: None,
            pool_count: 1,
            start_retry_interval_secs: 30,
            message_queue_capacity: 1024,
            log_level: "info".to_string(),
        }
    }
}

/// Complete client configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub common: ClientCommonConfig,
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

impl ClientConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for proxy in &self.proxies {
            proxy.validate()?;
            if !seen.insert(proxy.name.as_str()) {
                return Err(ConfigError::DuplicateName(proxy.name.clone()));
            }
        }
        Ok(())
    }

    /// Desired proxy set keyed by name
    pub fn proxy_map(&self) -> HashMap<String, ProxyConfig> {
        self.proxies
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
common:
  server_addr: tunnel.example.com
  server_port: 7000
proxies:
  - name: ssh
    kind:
      tcp:
        remote_port: 6000
    local_port: 22
  - name: web
    kind:
      http:
        custom_domains: [web.example.com]
    local_ip: 10.0.0.5
    local_port: 8080
    use_compression: true
"#;

    #[test]
    fn test_parse_sample() {
        let config = ClientConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.common.server_addr, "tunnel.example.com");
        assert_eq!(config.common.start_retry_interval_secs, 30);
        assert_eq!(config.proxies.len(), 2);

        let ssh = &config.proxies[0];
        assert_eq!(ssh.kind, ProxyType::Tcp { remote_port: 6000 });
        assert_eq!(ssh.local_ip, "127.0.0.1");
        assert_eq!(ssh.local_addr(), "127.0.0.1:22");

        let web = &config.proxies[1];
        assert_eq!(web.kind.as_str(), "http");
        assert!(web.use_compression);
        assert_eq!(web.local_addr(), "10.0.0.5:8080");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
proxies:
  - name: ssh
    kind: { tcp: { remote_port: 6000 } }
    local_port: 22
  - name: ssh
    kind: { tcp: { remote_port: 6001 } }
    local_port: 2222
"#;
        let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(ref n) if n == "ssh"));
    }

    #[test]
    fn test_missing_local_port_rejected() {
        let yaml = r#"
proxies:
  - name: ssh
    kind: { tcp: {} }
"#;
        let err = ClientConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLocalPort(_)));
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = ClientConfig {
            common: ClientCommonConfig::default(),
            proxies: vec![ProxyConfig::tcp("  ", 22, 0)],
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        let map = config.proxy_map();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("ssh"));
        assert!(map.contains_key("web"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClientConfig::load("/nonexistent/burrow.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/burrow.yaml"));
    }

    #[test]
    fn test_compare_ignores_domain_order() {
        let a = ProxyConfig::http(
            "web",
            8080,
            vec!["a.example.com".to_string(), "b.example.com".to_string()],
        );
        let b = ProxyConfig::http(
            "web",
            8080,
            vec!["b.example.com".to_string(), "a.example.com".to_string()],
        );

        assert_ne!(a, b);
        assert!(a.compare(&b));
    }

    #[test]
    fn test_compare_detects_identity_changes() {
        let base = ProxyConfig::tcp("ssh", 22, 6000);

        assert!(base.compare(&base.clone()));
        assert!(!base.compare(&ProxyConfig::tcp("ssh", 22, 6001)));
        assert!(!base.compare(&ProxyConfig::tcp("ssh", 2222, 6000)));
        assert!(!base.compare(&base.clone().with_local_ip("10.0.0.1")));

        let mut encrypted = base.clone();
        encrypted.use_encryption = true;
        assert!(!base.compare(&encrypted));

        let mut tagged = base.clone();
        tagged.metas.insert("env".to_string(), "prod".to_string());
        assert!(!base.compare(&tagged));

        let udp = ProxyConfig::new("ssh", ProxyType::Udp { remote_port: 6000 }, 22);
        assert!(!base.compare(&udp));
    }

    #[test]
    fn test_to_new_proxy() {
        let msg = ProxyConfig::tcp("ssh", 22, 6000).to_new_proxy();
        assert_eq!(msg.proxy_name, "ssh");
        assert_eq!(msg.proxy_type, "tcp");
        assert_eq!(msg.remote_port, Some(6000));
        assert!(msg.custom_domains.is_empty());

        let msg = ProxyConfig::http("web", 8080, vec!["web.example.com".to_string()])
            .to_new_proxy();
        assert_eq!(msg.proxy_type, "http");
        assert_eq!(msg.remote_port, None);
        assert_eq!(msg.custom_domains, vec!["web.example.com"]);
    }
}
