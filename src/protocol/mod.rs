// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

/// Stream codec for `tokio-util` framed transports.
pub mod codec;
/// Control and address field constants.
pub mod control;
/// Frame model and wire encoding.
pub mod frame;
/// Streaming frame parser.
pub mod parser;
