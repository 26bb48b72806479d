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
#![warn(missing_docs)]

//! Sharing one M-Bus slave between two masters.
//!
//! ```text
//! external master ──┐
//!                   ├── proxy ── slave
//! local master ─────┘
//! ```
//!
//! The external master addresses the slave by its primary address. The local master
//! talks to a virtual secondary-addressed slave; the proxy answers link management
//! itself and rewrites data requests to the real slave address.

use crate::protocol::control::ADDRESS_SECONDARY;
use crate::protocol::frame::Frame;
use futures::{Sink, Stream};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Request/response multiplexer.
pub mod multiplexer;

pub use multiplexer::Multiplexer;

/// A framed duplex connection.
pub trait FramePort:
    Stream<Item = std::io::Result<Frame>> + Sink<Frame, Error = std::io::Error> + Unpin
{
}

impl<T> FramePort for T where
    T: Stream<Item = std::io::Result<Frame>> + Sink<Frame, Error = std::io::Error> + Unpin
{
}

/// Port roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    /// Master outside our control (e.g. the heating controller's bus master).
    ExternalMaster,
    /// The physical slave.
    Slave,
    /// Master on this host (e.g. wmbusmeters).
    LocalMaster,
}

impl Port {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Port::ExternalMaster => "external_master",
            Port::Slave => "slave",
            Port::LocalMaster => "local_master",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default primary address of the shared slave.
pub const DEFAULT_SLAVE_ADDRESS: u8 = 0x5A;
/// Default reply timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default secondary address selection payload sent by the local master
/// (identification number 68279387, wildcard manufacturer/version/medium).
pub const DEFAULT_LOCAL_SELECT_DATA: [u8; 8] = [0x87, 0x93, 0x27, 0x68, 0xFF, 0xFF, 0xFF, 0xFF];

/// Addresses and timing the multiplexer routes by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routing {
    /// Primary address of the real slave.
    pub slave_address: u8,
    /// Address the local master uses for the slave.
    pub local_address: u8,
    /// SND_UD payload by which the local master selects the slave.
    pub local_select_data: Vec<u8>,
    /// How long to wait for the slave's reply.
    pub response_timeout: Duration,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            slave_address: DEFAULT_SLAVE_ADDRESS,
            local_address: ADDRESS_SECONDARY,
            local_select_data: DEFAULT_LOCAL_SELECT_DATA.to_vec(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Proxy errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Decoding or reading a frame failed.
    #[error("failed reading frame from {port}")]
    Read {
        /// Port that failed.
        port: Port,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
    /// Writing a frame failed.
    #[error("failed writing frame to {port}")]
    Write {
        /// Port that failed.
        port: Port,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
    /// The port closed while a reply was awaited.
    #[error("{0} port closed")]
    PortClosed(Port),
    /// Every port reached end of stream.
    #[error("all ports closed")]
    AllPortsClosed,
}
