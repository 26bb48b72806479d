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

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Frames decoded per port.
    pub frames_received_total: IntCounterVec,
    /// Frames written per port.
    pub frames_sent_total: IntCounterVec,
    /// Request/response exchanges relayed through the slave.
    pub frames_forwarded_total: IntCounter,
    /// Requests acknowledged by the proxy itself.
    pub local_acks_total: IntCounter,
    /// Frames that fit no routing rule, per port.
    pub unexpected_frames_total: IntCounterVec,
    /// Forwarded requests the slave did not answer in time.
    pub response_timeouts_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_received_total = IntCounterVec::new(
            Opts::new("mbus_frames_received_total", "Frames decoded per port"),
            &["port"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let frames_sent_total = IntCounterVec::new(
            Opts::new("mbus_frames_sent_total", "Frames written per port"),
            &["port"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let frames_forwarded_total = IntCounter::new(
            "mbus_frames_forwarded_total",
            "Request/response exchanges relayed through the slave",
        )
        .map_err(|_| MetricsError::Prom)?;
        let local_acks_total = IntCounter::new(
            "mbus_local_acks_total",
            "Requests acknowledged by the proxy",
        )
        .map_err(|_| MetricsError::Prom)?;
        let unexpected_frames_total = IntCounterVec::new(
            Opts::new(
                "mbus_unexpected_frames_total",
                "Frames matching no routing rule",
            ),
            &["port"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let response_timeouts_total = IntCounter::new(
            "mbus_response_timeouts_total",
            "Forwarded requests without a slave response",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(frames_received_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(frames_sent_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(frames_forwarded_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(local_acks_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(unexpected_frames_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(response_timeouts_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            frames_received_total,
            frames_sent_total,
            frames_forwarded_total,
            local_acks_total,
            unexpected_frames_total,
            response_timeouts_total,
        })
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|_| MetricsError::Prom)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_labelled_counters() {
        let m = Metrics::new().unwrap();
        m.frames_received_total.with_label_values(&["slave"]).inc();
        m.local_acks_total.inc_by(2);

        let text = String::from_utf8(m.encode().unwrap()).unwrap();
        assert!(text.contains("mbus_frames_received_total{port=\"slave\"} 1"));
        assert!(text.contains("mbus_local_acks_total 2"));
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.response_timeouts_total.inc();
        assert_eq!(b.response_timeouts_total.get(), 0);
    }
}
