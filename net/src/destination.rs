use std::{
    fmt::{self, Display},
    io,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
    vec,
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_types::PortNumber;

lazy_static! {
    // Accepts `host:port` and the locator notation `host[port]`
    static ref AUTHORITY: Regex =
        Regex::new(r"^\s*(?P<host>[^\s\[\]:]+|\[[0-9a-fA-F:.]+\])(?::(?P<port>\d+)|\[(?P<bracket_port>\d+)\])\s*$")
            .expect("Destination: invalid authority pattern");
}

/// The listening endpoint of a peer process. Used as the lookup key for outbound connections
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    host: String,
    port: PortNumber,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseDestinationError {
    #[error("'{text}' is not of the form host:port or host[port]")]
    Malformed { text: String },

    #[error("'{text}' does not contain a valid port number")]
    InvalidPort { text: String },
}

impl Destination {
    pub fn host(self: &Self) -> &str { &self.host }
    pub fn port(self: &Self) -> PortNumber { self.port }

    pub fn new(host: &str, port: PortNumber) -> Self {
        Self {
            host: String::from(host),
            port,
        }
    }

    /// Formats as `host:port` suitable for passing to the socket functions
    pub fn authority(self: &Self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Destination {
    fn from(address: SocketAddr) -> Self {
        Self {
            host: address.ip().to_string(),
            port: address.port(),
        }
    }
}

impl FromStr for Destination {
    type Err = ParseDestinationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let captures = AUTHORITY
            .captures(text)
            .ok_or_else(|| ParseDestinationError::Malformed { text: String::from(text) })?;

        let host = captures["host"].trim_start_matches('[').trim_end_matches(']');
        let port = captures
            .name("port")
            .or_else(|| captures.name("bracket_port"))
            .ok_or_else(|| ParseDestinationError::Malformed { text: String::from(text) })?;
        let port = port
            .as_str()
            .parse::<PortNumber>()
            .map_err(|_| ParseDestinationError::InvalidPort { text: String::from(text) })?;

        Ok(Self::new(host, port))
    }
}

impl ToSocketAddrs for Destination {
    type Iter = vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_host_and_port() {
        let destination: Destination = "localhost:10334".parse().unwrap();
        assert_eq!("localhost", destination.host());
        assert_eq!(10334, destination.port());
    }

    #[test]
    fn should_parse_locator_notation() {
        let destination: Destination = " 10.0.0.7[40404] ".parse().unwrap();
        assert_eq!("10.0.0.7", destination.host());
        assert_eq!(40404, destination.port());
    }

    #[test]
    fn should_parse_bracketed_ipv6() {
        let destination: Destination = "[::1]:7000".parse().unwrap();
        assert_eq!("::1", destination.host());
        assert_eq!("[::1]:7000", destination.authority());
    }

    #[test]
    fn should_reject_missing_port() {
        assert!(matches!(
            "localhost".parse::<Destination>(),
            Err(ParseDestinationError::Malformed { .. })
        ));
    }

    #[test]
    fn should_reject_port_out_of_range() {
        assert!(matches!(
            "localhost:70000".parse::<Destination>(),
            Err(ParseDestinationError::InvalidPort { .. })
        ));
    }

    #[test]
    fn should_compare_by_value() {
        let address: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(Destination::new("127.0.0.1", 9000), Destination::from(address));
        assert_ne!(Destination::new("127.0.0.1", 9000), Destination::new("127.0.0.1", 9001));
    }
}
