use std::net::{AddrParseError, Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::background;

pub const DEFAULT_LISTEN_ADDR: &str = ":12345";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub background_task: background::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 12345).into(),
            background_task: background::Config::default(),
        }
    }
}

/// Parses a listen address of the form `host:port`.
///
/// The host may be left out (`:port`), in which case the server listens on all IPv4 interfaces.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, AddrParseError> {
    match addr.strip_prefix(':') {
        Some(port) => format!("{}:{port}", Ipv4Addr::UNSPECIFIED).parse(),
        None => addr.parse(),
    }
}
