//! Store configuration and filesystem URI parsing.

use crate::rpc::{Consistency, Pool};
use crate::util;
use std::io;

/// Configuration key for the default read consistency level.
pub const READ_CONSISTENCY_KEY: &str = "brisk.consistencylevel.read";
/// Configuration key for the default write consistency level.
pub const WRITE_CONSISTENCY_KEY: &str = "brisk.consistencylevel.write";
/// Configuration key for the system-wide replication factor.
pub const REPLICATION_KEY: &str = "cfs.replication";
/// Configuration key for the cluster RPC port.
pub const RPC_PORT_KEY: &str = "cfs.rpc.port";

/// Store-wide configuration with the documented defaults.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub read_consistency: Consistency,
    pub write_consistency: Consistency,
    /// Replication factor of the analytics datacenter.
    pub replication: u8,
    /// Port substituted when a URI carries none (or `-1`).
    pub rpc_port: u16,
    /// Datacenter holding the filesystem replicas.
    pub analytics_dc: String,
    /// Datacenter excluded from filesystem replication.
    pub oltp_dc: String,
    /// Upper bound of the random sleep destaggering concurrent keyspace
    /// creation, in milliseconds.
    pub destagger_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_consistency: Consistency::Quorum,
            write_consistency: Consistency::Quorum,
            replication: 1,
            rpc_port: 9160,
            analytics_dc: "Analytics".to_string(),
            oltp_dc: "Cassandra".to_string(),
            destagger_ms: 5000,
        }
    }
}

impl StoreConfig {
    /// Builds a configuration from flat key/value pairs, falling back to the
    /// defaults for absent keys. Unknown keys are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            match key {
                READ_CONSISTENCY_KEY => config.read_consistency = parse_consistency(key, value)?,
                WRITE_CONSISTENCY_KEY => config.write_consistency = parse_consistency(key, value)?,
                REPLICATION_KEY => {
                    config.replication = value.parse().map_err(|_| invalid(key, value))?
                }
                RPC_PORT_KEY => config.rpc_port = value.parse().map_err(|_| invalid(key, value))?,
                _ => {}
            }
        }
        Ok(config)
    }
}

fn parse_consistency(key: &str, value: &str) -> io::Result<Consistency> {
    value.parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid value `{value}` for configuration key `{key}`"),
    )
}

/// A parsed filesystem URI. The scheme selects the storage pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreUri {
    pub pool: Pool,
    pub host: String,
    pub port: u16,
}

impl StoreUri {
    /// Parses `cfs://host:port/` and `cfs-archive://host:port/` URIs.
    ///
    /// An absent, empty or literal `"null"` host is replaced by the local
    /// hostname; an absent or `-1` port by the configured RPC port.
    pub fn parse(uri: &str, config: &StoreConfig) -> io::Result<Self> {
        let Some((scheme, rest)) = uri.split_once("://") else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{uri}` is not a filesystem URI"),
            ));
        };
        let Some(pool) = Pool::from_scheme(scheme) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported URI scheme `{scheme}`"),
            ));
        };
        let authority = match rest.find('/') {
            Some(i) => &rest[..i],
            None => rest,
        };
        let (host_part, port_part) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        };
        let host = if host_part.is_empty() || host_part == "null" {
            util::local_hostname()
        } else {
            host_part.to_string()
        };
        let port = match port_part {
            None => config.rpc_port,
            Some(p) => {
                let port: i32 = p
                    .parse()
                    .map_err(|_| invalid("port", p))?;
                if port == -1 {
                    config.rpc_port
                } else {
                    u16::try_from(port).map_err(|_| invalid("port", p))?
                }
            }
        };
        Ok(Self { pool, host, port })
    }
}
