//! Server addresses and server lists.
//!
//! Servers are written as `host[:port]`, or `[ipv6][:port]` for IPv6
//! literals. The host is trimmed and must not be empty; the port defaults to
//! [`DEFAULT_PORT`] and must be positive.
//!
//! # Example
//!
//! ```
//! use gearman_client::transport::ServerList;
//!
//! let mut servers = ServerList::new();
//! servers.add_many("localhost, 10.0.0.2:7003").unwrap();
//! assert_eq!(servers.to_strings(), vec!["localhost:4730", "10.0.0.2:7003"]);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{GearmanError, Result};

/// Default job server port.
pub const DEFAULT_PORT: u16 = 4730;

/// One job server address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerAddr {
    host: String,
    port: u16,
}

impl ServerAddr {
    /// Build an address from a host and optional port.
    pub fn new(host: &str, port: Option<u16>) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(GearmanError::InvalidServer(format!("invalid host '{host}'")));
        }
        let port = port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(GearmanError::InvalidServer(format!("invalid port '{port}'")));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for ServerAddr {
    type Err = GearmanError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || GearmanError::InvalidServer(s.to_string());
        let parse_port = |port: &str| port.trim().parse::<u16>().map_err(|_| invalid());

        // IPv6 literals must be bracketed: `[::1]` or `[::1]:4730`.
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => None,
                tail => Some(parse_port(tail.strip_prefix(':').ok_or_else(invalid)?)?),
            };
            return Self::new(host, port);
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, Some(parse_port(port)?)),
            None => (s, None),
        };
        if host.contains(':') {
            return Err(invalid());
        }
        Self::new(host, port)
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ordered, duplicate-free list of servers.
#[derive(Debug, Clone, Default)]
pub struct ServerList {
    servers: Vec<ServerAddr>,
}

impl ServerList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one server from a `host[:port]` string.
    pub fn add(&mut self, server: &str) -> Result<&mut Self> {
        let addr = server.parse()?;
        self.push(addr)
    }

    /// Add a server from host and optional port.
    pub fn add_host(&mut self, host: &str, port: Option<u16>) -> Result<&mut Self> {
        let addr = ServerAddr::new(host, port)?;
        self.push(addr)
    }

    /// Add comma-separated servers.
    pub fn add_many(&mut self, servers: &str) -> Result<&mut Self> {
        for server in servers.split(',') {
            self.add(server)?;
        }
        Ok(self)
    }

    /// Add an already parsed address.
    pub fn push(&mut self, addr: ServerAddr) -> Result<&mut Self> {
        if self.servers.contains(&addr) {
            return Err(GearmanError::DuplicateServer(addr.to_string()));
        }
        self.servers.push(addr);
        Ok(self)
    }

    /// Iterate over servers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerAddr> {
        self.servers.iter()
    }

    /// Servers rendered as `host:port`.
    pub fn to_strings(&self) -> Vec<String> {
        self.servers.iter().map(ToString::to_string).collect()
    }

    /// Number of servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
