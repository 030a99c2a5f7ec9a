//! Catalog entries and the address sets delivered to connections.

use std::{fmt::Display, net::Ipv6Addr, ops::Deref};

/// A service instance as reported by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceEntry {
    /// Host name or IP literal of the instance.
    pub host: String,
    /// Port the instance listens on.
    pub port: u16,
}

impl ServiceEntry {
    /// Creates an entry for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`, accepting bracketed IPv6 literals.
    pub fn parse(authority: &str) -> Option<Self> {
        let (host, port) = authority.rsplit_once(':')?;
        let port = port.parse().ok()?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }

    /// Dialable `host:port` form of the entry.
    pub fn addr(&self) -> String {
        self.to_string()
    }
}

impl Display for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // A bare IPv6 literal would be ambiguous with the port separator.
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A resolved address handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Dialable `host:port`.
    pub addr: String,
    /// Name the server is expected to present, i.e. the logical service name.
    pub server_name: String,
}

/// Addresses sorted ascending by [`Address::addr`].
///
/// Sorting keeps successive deliveries stable, so the only differences a
/// connection sees between two sets are actual membership changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet(Vec<Address>);

impl AddressSet {
    /// Builds a set from catalog entries, tagging each with `server_name`.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a ServiceEntry>,
        server_name: &str,
    ) -> Self {
        entries
            .into_iter()
            .map(|entry| Address {
                addr: entry.addr(),
                server_name: server_name.to_string(),
            })
            .collect()
    }

    /// A set of exactly one address.
    pub fn single(addr: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self(vec![Address {
            addr: addr.into(),
            server_name: server_name.into(),
        }])
    }

    /// The dialable addresses, in order.
    pub fn addrs(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|a| a.addr.as_str())
    }
}

impl FromIterator<Address> for AddressSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut addresses = iter.into_iter().collect::<Vec<_>>();
        addresses.sort_by(|a, b| a.addr.cmp(&b.addr));
        Self(addresses)
    }
}

impl Deref for AddressSet {
    type Target = [Address];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
