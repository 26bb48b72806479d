// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Serial line settings. M-Bus uses 8 data bits, even parity and one stop bit.

use serde::{Deserialize, Serialize};
use std::io;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

/// Default M-Bus baud rate.
pub const DEFAULT_BAUDRATE: u32 = 2400;

/// Parity setting. Some level converters strip parity, hence the override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// EN 13757-2 default.
    #[default]
    Even,
    /// Odd parity.
    Odd,
    /// No parity bit.
    None,
}

impl From<SerialParity> for Parity {
    fn from(p: SerialParity) -> Self {
        match p {
            SerialParity::Even => Parity::Even,
            SerialParity::Odd => Parity::Odd,
            SerialParity::None => Parity::None,
        }
    }
}

/// Serial settings shared by every port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialConfig {
    /// Line speed in baud.
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Parity bit.
    #[serde(default)]
    pub parity: SerialParity,
}

fn default_baudrate() -> u32 {
    DEFAULT_BAUDRATE
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baudrate: DEFAULT_BAUDRATE,
            parity: SerialParity::default(),
        }
    }
}

/// Open `path` as an async serial stream.
pub fn open_serial(path: &str, cfg: &SerialConfig) -> io::Result<SerialStream> {
    debug!(path, baudrate = cfg.baudrate, parity = ?cfg.parity, "opening serial port");

    tokio_serial::new(path, cfg.baudrate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(cfg.parity.into())
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(io::Error::from)
}
