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

//! M-Bus (Meter-Bus, EN 13757-2) link layer toolkit.
//!
//! This crate provides:
//! - The four link-layer frame formats with allocation-free encoding
//! - A streaming `nom` parser that reports how many bytes are still missing
//! - A `tokio-util` codec for serial streams
//! - A multiplexer that shares one slave between two masters
//! - Monitoring via Prometheus metrics and structured logging

/// TOML/CLI configuration for the binaries.
pub mod config;
/// Observability (metrics, logging, HTTP exposition).
pub mod monitoring;
/// Link-layer frames, parser and stream codec.
pub mod protocol;
/// Serial multiplexer between an external master, a local master and a slave.
pub mod proxy;
/// Serial port setup.
pub mod serial;

pub use protocol::codec::MbusCodec;
pub use protocol::frame::{Frame, FrameKind};
pub use protocol::parser::{FrameError, Needed, ParseError};

/// Version string with build metadata, shown by `--version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    ", rustc ",
    env!("VERGEN_RUSTC_SEMVER"),
    ", built ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    ")"
);
