// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

/// `/metrics` and `/healthz` over HTTP.
pub mod http;
/// Tracing subscriber setup.
pub mod logging;
/// Prometheus counters.
pub mod metrics;
