use std::net::SocketAddr;

/// What the HTTP listener needs out of the service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: tracing::Level,
}

impl From<&crate::Config> for Config {
    fn from(service: &crate::Config) -> Self {
        Self {
            listen_addr: service.listen_addr,
            log_level: service.log_level(),
        }
    }
}
