// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Configuration
//!
//! Both structures can be deserialized from any `serde` format, missing fields take their
//! default value:
//!
//! ```
//! # use recovery_scanner::config::ElectrumConfig;
//! let config: ElectrumConfig = serde_json::from_str(
//!     r#"{"servers": ["electrum.blockstream.info:50002"], "require_tls": true}"#,
//! )?;
//! assert_eq!(config.pool_size, 6);
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::electrum::servers::PUBLIC_SERVERS;
use crate::electrum::stream::split_endpoint;
use crate::error::Error;

/// Default number of clients kept by the connection pool
pub const DEFAULT_POOL_SIZE: usize = 6;
/// Default number of addresses per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default time a batch may spend retrying before the scan fails (15 minutes)
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 15 * 60;

/// Configuration for the Electrum clients and their pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectrumConfig {
    /// Server endpoints in `host:port` form, used in rotation
    pub servers: Vec<String>,
    /// Never fall back to plain TCP when the TLS handshake fails
    pub require_tls: bool,
    /// Verify server certificates against the webpki roots
    pub validate_domain: bool,
    /// Time allowed to establish a connection, in seconds
    pub connection_timeout_secs: u64,
    /// Time allowed for a single call, in seconds. Batched calls get twice as much
    pub call_timeout_secs: u64,
    /// Prefixes of the server implementations known to answer batched calls correctly
    pub batching_impls: Vec<String>,
    /// Number of clients, which bounds the number of concurrent connections
    pub pool_size: usize,
}

impl Default for ElectrumConfig {
    fn default() -> Self {
        ElectrumConfig {
            servers: PUBLIC_SERVERS.iter().map(|s| s.to_string()).collect(),
            require_tls: false,
            validate_domain: false,
            connection_timeout_secs: 30,
            call_timeout_secs: 30,
            batching_impls: vec!["ElectrumX".to_string()],
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl ElectrumConfig {
    /// Check the configuration before any connection is attempted
    pub fn validate(&self) -> Result<(), Error> {
        if self.servers.is_empty() {
            return Err(Error::EmptyServerList);
        }
        if self.pool_size == 0 {
            return Err(Error::InvalidPoolSize);
        }
        for server in &self.servers {
            split_endpoint(server)?;
        }

        Ok(())
    }

    /// Time allowed to establish a connection
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Time allowed for a single call
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Whether `server_impl` (as reported by `server.version`) handles batched calls
    pub fn supports_batching(&self, server_impl: &str) -> bool {
        self.batching_impls
            .iter()
            .any(|prefix| server_impl.starts_with(prefix.as_str()))
    }
}

/// Configuration for a [`Scanner`](crate::scanner::Scanner)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Number of addresses looked up per round trip
    pub batch_size: usize,
    /// Time a batch may spend retrying before the whole scan fails, in seconds
    pub task_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
        }
    }
}

impl ScannerConfig {
    /// Check the configuration before any task is started
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }

        Ok(())
    }

    /// Time a batch may spend retrying
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ElectrumConfig::default();
        assert!(!config.servers.is_empty());
        assert!(!config.require_tls);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());

        let config = ScannerConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.task_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_batching_allowlist() {
        let mut config = ElectrumConfig::default();
        assert!(config.supports_batching("ElectrumX 1.16.0"));
        assert!(!config.supports_batching("Fulcrum 1.9.0"));
        assert!(!config.supports_batching(""));

        config.batching_impls.push("Fulcrum".to_string());
        assert!(config.supports_batching("Fulcrum 1.9.0"));
    }

    #[test]
    fn test_invalid_configs() {
        let config = ElectrumConfig {
            servers: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::EmptyServerList)));

        let config = ElectrumConfig {
            pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidPoolSize)));

        let config = ElectrumConfig {
            servers: vec!["127.0.0.1:1".to_string(), "electrum.example.com".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidEndpoint(_))));

        let config = ScannerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidBatchSize)));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ScannerConfig = serde_json::from_str(r#"{"batch_size": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.task_timeout_secs, DEFAULT_TASK_TIMEOUT_SECS);
    }
}
