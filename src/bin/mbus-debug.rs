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

//! Bus monitor: logs every frame seen on a serial line or in a raw capture file.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use mbus_protocol::monitoring::logging::{init_logging, LogFormat};
use mbus_protocol::serial::{open_serial, SerialConfig, DEFAULT_BAUDRATE};
use mbus_protocol::MbusCodec;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn, Level};

#[derive(Parser, Debug)]
#[command(version, long_version = mbus_protocol::LONG_VERSION, about)]
struct Args {
    #[arg(long, default_value = "info")]
    log_level: Level,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Serial port to listen on.
    #[arg(long, value_name = "TTY", value_hint = clap::ValueHint::FilePath, required_unless_present = "file", conflicts_with = "file")]
    tty_path: Option<String>,

    /// Raw capture to decode instead of a live port.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    file: Option<PathBuf>,

    #[arg(short, long, default_value_t = DEFAULT_BAUDRATE)]
    serial_baudrate: u32,

    /// Also log the raw bytes of every frame.
    #[arg(long)]
    hex: bool,
}

async fn monitor<R: AsyncRead + Unpin>(reader: R, hex_dump: bool) -> Result<u64> {
    let mut frames = FramedRead::new(reader, MbusCodec::resynchronizing());
    let mut count = 0u64;

    while let Some(frame) = frames.next().await {
        let frame = frame.context("Failed reading frame")?;
        count += 1;
        if hex_dump {
            let raw = frame.to_bytes()?;
            info!(kind = %frame.kind(), raw = %hex::encode(raw), "{frame}");
        } else {
            info!(kind = %frame.kind(), "{frame}");
        }
    }

    let discarded = frames.decoder().discarded();
    if discarded > 0 {
        warn!(discarded, "bytes skipped while resynchronising");
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level, args.log_format);

    let count = match (&args.file, &args.tty_path) {
        (Some(path), _) => {
            debug!(path = %path.display(), "decoding capture");
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            monitor(file, args.hex).await?
        }
        (None, Some(tty)) => {
            let cfg = SerialConfig {
                baudrate: args.serial_baudrate,
                ..SerialConfig::default()
            };
            let serial =
                open_serial(tty, &cfg).with_context(|| format!("Failed to open serial port {tty}"))?;
            monitor(serial, args.hex).await?
        }
        (None, None) => anyhow::bail!("either --tty-path or --file is required"),
    };

    info!(count, "end of input");
    Ok(())
}
