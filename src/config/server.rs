//! Server configuration.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use super::parse::{env_duration, env_opt, env_or, env_parse};
use super::ConfigError;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "http://127.0.0.1:8008";

/// Default worker process count.
pub const DEFAULT_WORKERS: usize = 4;

/// Listen address in `scheme://host:port` form.
///
/// Only `http` is served; a bare `host:port` is read as `http://host:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenAddr {
    url: Url,
}

impl ListenAddr {
    /// Host part as written (IPv6 literals keep their brackets).
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port, falling back to the scheme's well-known port.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Resolve to the first socket address.
    pub fn resolve(&self) -> std::io::Result<SocketAddr> {
        let host = self.host().trim_start_matches('[').trim_end_matches(']');
        (host, self.port()).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address resolved for {}", self),
            )
        })
    }
}

impl FromStr for ListenAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let candidate = if s.contains("://") {
            s.to_string()
        } else {
            format!("http://{}", s)
        };

        let url = Url::parse(&candidate).map_err(|e| format!("{}", e))?;
        if url.scheme() != "http" {
            return Err(format!("unsupported scheme '{}', expected http", url.scheme()));
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err("missing host".to_string());
        }
        Ok(Self { url })
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host(), self.port())
    }
}

/// Resolve a configured worker count; 0 means one per CPU.
pub fn resolve_workers(configured: usize) -> usize {
    if configured == 0 {
        num_cpus::get().max(1)
    } else {
        configured
    }
}

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Project root; runtime artefacts live under `<project>/runtime`.
    pub project_path: PathBuf,
    /// Address every worker binds with SO_REUSEPORT.
    pub listen: ListenAddr,
    /// Desired number of worker processes (always >= 1).
    pub workers: usize,
    /// Grace period before a stopping worker is killed.
    pub stop_timeout: Duration,
    /// Capacity of the supervisor log ring shown by `status`.
    pub status_logs: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_path = match env_opt("RIP_PROJECT_PATH") {
            Some(p) => PathBuf::from(p),
            None => std::env::current_dir().map_err(|error| ConfigError::Io {
                path: ".".into(),
                error,
            })?,
        };

        let listen_raw = env_or("RIP_HTTP_LISTEN", DEFAULT_LISTEN);
        let listen = listen_raw
            .parse::<ListenAddr>()
            .map_err(|error| ConfigError::Parse {
                key: "RIP_HTTP_LISTEN".into(),
                value: listen_raw.clone(),
                error,
            })?;

        let workers = resolve_workers(env_parse("RIP_HTTP_WORKERS", DEFAULT_WORKERS)?);

        let status_logs: usize = env_parse("RIP_STATUS_LOGS", 1)?;
        if status_logs == 0 {
            return Err(ConfigError::Invalid {
                key: "RIP_STATUS_LOGS".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            project_path,
            listen,
            workers,
            stop_timeout: env_duration("RIP_STOP_TIMEOUT", "10s")?,
            status_logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr_full() {
        let addr: ListenAddr = "http://127.0.0.1:8008".parse().unwrap();
        assert_eq!(addr.scheme(), "http");
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), 8008);
        assert_eq!(addr.to_string(), "http://127.0.0.1:8008");
        assert_eq!(addr.resolve().unwrap(), "127.0.0.1:8008".parse().unwrap());
    }

    #[test]
    fn test_listen_addr_bare_and_ipv6() {
        let addr: ListenAddr = "0.0.0.0:9000".parse().unwrap();
        assert_eq!(addr.port(), 9000);

        let addr: ListenAddr = "http://[::1]:8080".parse().unwrap();
        assert_eq!(addr.resolve().unwrap(), "[::1]:8080".parse().unwrap());
    }

    #[test]
    fn test_listen_addr_default_port() {
        let addr: ListenAddr = "http://localhost".parse().unwrap();
        assert_eq!(addr.port(), 80);
    }

    #[test]
    fn test_listen_addr_rejects_other_schemes() {
        assert!("https://127.0.0.1:443".parse::<ListenAddr>().is_err());
        assert!("tcp://127.0.0.1:80".parse::<ListenAddr>().is_err());
        assert!("http://".parse::<ListenAddr>().is_err());
    }

    #[test]
    fn test_resolve_workers() {
        assert_eq!(resolve_workers(3), 3);
        assert!(resolve_workers(0) >= 1);
    }
}
