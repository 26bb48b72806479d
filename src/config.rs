// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Proxy configuration.
//!
//! ## Format (TOML)
//! Every section is optional; the three port paths must be set either here or on the
//! command line.
//!
//! ```text
//! [serial]
//! baudrate = 2400
//! parity = "even"          # even | odd | none
//!
//! [ports]
//! external_master = "/dev/ttyUSB0"
//! slave = "/dev/ttyUSB1"
//! local_master = "/dev/pts/3"
//!
//! [routing]
//! slave_address = 90       # 0x5A
//! local_address = 253      # 0xFD
//! local_select_data = "87932768ffffffff"
//! response_timeout_ms = 2000
//!
//! [monitoring]
//! log_level = "info"
//! log_format = "compact"   # compact | json
//! metrics_addr = "127.0.0.1:9464"
//! ```

use crate::monitoring::logging::LogFormat;
use crate::protocol::control::{is_broadcast, ADDRESS_SECONDARY};
use crate::proxy::{Port, Routing, DEFAULT_LOCAL_SELECT_DATA, DEFAULT_SLAVE_ADDRESS};
use crate::serial::SerialConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read the file.
    #[error("read config {path}")]
    Read {
        /// File path.
        path: String,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
    /// Not valid TOML for this schema.
    #[error("parse config")]
    Parse(#[from] toml::de::Error),
    /// A port path is not configured.
    #[error("no tty path configured for {0}")]
    MissingPort(Port),
    /// Baud rate is zero.
    #[error("baud rate must be positive")]
    InvalidBaudrate,
    /// Response timeout is zero.
    #[error("response timeout must be positive")]
    InvalidTimeout,
    /// Address cannot be used for routing.
    #[error("{field} {value:#04x} is a broadcast address")]
    InvalidAddress {
        /// Offending key.
        field: &'static str,
        /// Offending value.
        value: u8,
    },
    /// Selection payload is not 8 hex-encoded bytes.
    #[error("local_select_data must be 8 hex-encoded bytes")]
    InvalidSelectData,
    /// Unknown log level name.
    #[error("unknown log level {0:?}")]
    InvalidLogLevel(String),
}

/// Configuration root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Serial line settings.
    #[serde(default)]
    pub serial: SerialConfig,
    /// TTY paths.
    #[serde(default)]
    pub ports: PortsConfig,
    /// Routing parameters.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// TTY paths per port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortsConfig {
    /// External master.
    #[serde(default)]
    pub external_master: Option<String>,
    /// Slave.
    #[serde(default)]
    pub slave: Option<String>,
    /// Local master.
    #[serde(default)]
    pub local_master: Option<String>,
}

/// Routing parameters as written in the file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Primary address of the slave.
    #[serde(default = "default_slave_address")]
    pub slave_address: u8,
    /// Address the local master uses.
    #[serde(default = "default_local_address")]
    pub local_address: u8,
    /// Hex-encoded secondary address selection payload.
    #[serde(default = "default_select_data")]
    pub local_select_data: String,
    /// Reply timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_slave_address() -> u8 {
    DEFAULT_SLAVE_ADDRESS
}

fn default_local_address() -> u8 {
    ADDRESS_SECONDARY
}

fn default_select_data() -> String {
    hex::encode(DEFAULT_LOCAL_SELECT_DATA)
}

fn default_timeout_ms() -> u64 {
    2_000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            slave_address: default_slave_address(),
            local_address: default_local_address(),
            local_select_data: default_select_data(),
            response_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Logging and metrics settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Serve Prometheus metrics on this address when set.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_addr: None,
        }
    }
}

impl ProxyConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check everything the proxy needs before opening any port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for port in [Port::ExternalMaster, Port::Slave, Port::LocalMaster] {
            self.port_path(port)?;
        }
        if self.serial.baudrate == 0 {
            return Err(ConfigError::InvalidBaudrate);
        }
        self.routing()?;
        self.log_level()?;
        Ok(())
    }

    /// Configured TTY path of `port`.
    pub fn port_path(&self, port: Port) -> Result<&str, ConfigError> {
        let path = match port {
            Port::ExternalMaster => &self.ports.external_master,
            Port::Slave => &self.ports.slave,
            Port::LocalMaster => &self.ports.local_master,
        };
        match path.as_deref() {
            Some(p) if !p.trim().is_empty() => Ok(p),
            _ => Err(ConfigError::MissingPort(port)),
        }
    }

    /// Routing parameters in the form the multiplexer uses.
    pub fn routing(&self) -> Result<Routing, ConfigError> {
        let r = &self.routing;
        if is_broadcast(r.slave_address) {
            return Err(ConfigError::InvalidAddress {
                field: "slave_address",
                value: r.slave_address,
            });
        }
        if is_broadcast(r.local_address) {
            return Err(ConfigError::InvalidAddress {
                field: "local_address",
                value: r.local_address,
            });
        }
        if r.response_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        let local_select_data =
            hex::decode(r.local_select_data.trim()).map_err(|_| ConfigError::InvalidSelectData)?;
        if local_select_data.len() != 8 {
            return Err(ConfigError::InvalidSelectData);
        }

        Ok(Routing {
            slave_address: r.slave_address,
            local_address: r.local_address,
            local_select_data,
            response_timeout: Duration::from_millis(r.response_timeout_ms),
        })
    }

    /// Parsed log level.
    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.monitoring
            .log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.monitoring.log_level.clone()))
    }
}
