use std::net::{Ipv4Addr, SocketAddr};

/// Bind settings for the plugin API. The API is only ever reachable from
/// the host itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Level of the per-request trace spans
    pub log_level: tracing::Level,
}

impl Config {
    pub fn loopback(port: u16) -> Self {
        let listen_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        tracing::debug!(%listen_addr, "plugin API bind address");
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_binds_localhost_only() {
        let config = Config::loopback(8089);
        assert!(config.listen_addr.ip().is_loopback());
        assert_eq!(config.listen_addr.port(), 8089);
    }
}
