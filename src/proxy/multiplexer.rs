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

use crate::monitoring::metrics::Metrics;
use crate::protocol::control::{
    is_function, ADDRESS_BROADCAST, ADDRESS_UNCONFIGURED, SND_NKE, SND_UD,
};
use crate::protocol::frame::Frame;
use crate::proxy::{FramePort, Port, ProxyError, Routing};
use futures::{FutureExt, SinkExt, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug)]
struct OpenPorts {
    external_master: bool,
    slave: bool,
    local_master: bool,
}

impl OpenPorts {
    fn any(&self) -> bool {
        self.external_master || self.slave || self.local_master
    }
}

/// Routes frames between the two masters and the slave, one exchange at a time.
pub struct Multiplexer<S> {
    routing: Routing,
    metrics: Arc<Metrics>,
    external_master: S,
    slave: S,
    local_master: S,
    open: OpenPorts,
}

impl<S: FramePort> Multiplexer<S> {
    /// Create a multiplexer over three framed ports.
    pub fn new(
        routing: Routing,
        metrics: Arc<Metrics>,
        external_master: S,
        slave: S,
        local_master: S,
    ) -> Self {
        Self {
            routing,
            metrics,
            external_master,
            slave,
            local_master,
            open: OpenPorts {
                external_master: true,
                slave: true,
                local_master: true,
            },
        }
    }

    /// Give the ports back as `(external_master, slave, local_master)`.
    pub fn into_ports(self) -> (S, S, S) {
        (self.external_master, self.slave, self.local_master)
    }

    /// Run until `token` is cancelled or a fatal error occurs.
    pub async fn run(&mut self, token: &CancellationToken) -> Result<(), ProxyError> {
        while !token.is_cancelled() {
            self.step(token).await?;
        }
        Ok(())
    }

    /// Handle one inbound frame (including any exchange it triggers).
    ///
    /// Priority: cancellation, external master, local master, slave. Ports that reached
    /// end of stream are no longer polled.
    pub async fn step(&mut self, token: &CancellationToken) -> Result<(), ProxyError> {
        let Self {
            routing,
            metrics,
            external_master,
            slave,
            local_master,
            open,
        } = self;

        loop {
            if !open.any() {
                return Err(ProxyError::AllPortsClosed);
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("cancellation requested, shutting down");
                    return Ok(());
                }
                next = external_master.next(), if open.external_master => match next {
                    None => {
                        warn!(port = %Port::ExternalMaster, "end of stream");
                        open.external_master = false;
                    }
                    Some(result) => {
                        let frame = result.map_err(|source| ProxyError::Read {
                            port: Port::ExternalMaster,
                            source,
                        })?;
                        received(metrics, Port::ExternalMaster, &frame);
                        return on_external_master(frame, routing, metrics, external_master, slave)
                            .await;
                    }
                },
                next = local_master.next(), if open.local_master => match next {
                    None => {
                        warn!(port = %Port::LocalMaster, "end of stream");
                        open.local_master = false;
                    }
                    Some(result) => {
                        let frame = result.map_err(|source| ProxyError::Read {
                            port: Port::LocalMaster,
                            source,
                        })?;
                        received(metrics, Port::LocalMaster, &frame);
                        return on_local_master(frame, routing, metrics, local_master, slave).await;
                    }
                },
                next = slave.next(), if open.slave => match next {
                    None => {
                        warn!(port = %Port::Slave, "end of stream");
                        open.slave = false;
                    }
                    Some(result) => {
                        let frame = result.map_err(|source| ProxyError::Read {
                            port: Port::Slave,
                            source,
                        })?;
                        received(metrics, Port::Slave, &frame);
                        unexpected(metrics, Port::Slave, &frame);
                        return Ok(());
                    }
                },
            }
        }
    }
}

async fn on_external_master<S: FramePort>(
    frame: Frame,
    routing: &Routing,
    metrics: &Metrics,
    master: &mut S,
    slave: &mut S,
) -> Result<(), ProxyError> {
    match frame {
        Frame::Short {
            control: SND_NKE,
            address,
        } if address == ADDRESS_BROADCAST || address == routing.slave_address => {
            acknowledge(master, Port::ExternalMaster, metrics).await
        }
        Frame::Short { address, .. }
        | Frame::Control { address, .. }
        | Frame::Long { address, .. }
            if address == routing.slave_address =>
        {
            forward(frame, master, Port::ExternalMaster, slave, routing, metrics).await
        }
        Frame::Short { .. } | Frame::Control { .. } | Frame::Long { .. } => {
            // addressed to another slave on the external bus
            info!(%frame, "ignoring frame for a slave we do not proxy");
            Ok(())
        }
        Frame::Single => {
            unexpected(metrics, Port::ExternalMaster, &frame);
            Ok(())
        }
    }
}

async fn on_local_master<S: FramePort>(
    frame: Frame,
    routing: &Routing,
    metrics: &Metrics,
    master: &mut S,
    slave: &mut S,
) -> Result<(), ProxyError> {
    match frame {
        Frame::Short {
            control: SND_NKE,
            address,
        } if address == ADDRESS_UNCONFIGURED || address == routing.local_address => {
            acknowledge(master, Port::LocalMaster, metrics).await
        }
        Frame::Long {
            control,
            address,
            ref data,
            ..
        } if is_function(control, SND_UD)
            && address == routing.local_address
            && *data == routing.local_select_data =>
        {
            debug!("local master selected the slave by secondary address");
            acknowledge(master, Port::LocalMaster, metrics).await
        }
        Frame::Short { control, address } if address == routing.local_address => {
            let request = Frame::Short {
                control,
                address: routing.slave_address,
            };
            forward(request, master, Port::LocalMaster, slave, routing, metrics).await
        }
        _ => {
            unexpected(metrics, Port::LocalMaster, &frame);
            Ok(())
        }
    }
}

/// Send `request` to the slave and relay its reply to `origin`.
///
/// A missing reply is not fatal: the requesting master times out and retries.
async fn forward<S: FramePort>(
    request: Frame,
    origin: &mut S,
    origin_port: Port,
    slave: &mut S,
    routing: &Routing,
    metrics: &Metrics,
) -> Result<(), ProxyError> {
    discard_stale(slave, metrics)?;

    debug!(frame = %request, from = %origin_port, "forwarding frame to slave");
    send(slave, Port::Slave, request, metrics).await?;

    let reply = match tokio::time::timeout(routing.response_timeout, slave.next()).await {
        Err(_) => {
            warn!(
                from = %origin_port,
                timeout_ms = routing.response_timeout.as_millis() as u64,
                "slave did not answer in time"
            );
            metrics.response_timeouts_total.inc();
            return Ok(());
        }
        Ok(None) => return Err(ProxyError::PortClosed(Port::Slave)),
        Ok(Some(Err(source))) => {
            return Err(ProxyError::Read {
                port: Port::Slave,
                source,
            })
        }
        Ok(Some(Ok(reply))) => reply,
    };
    received(metrics, Port::Slave, &reply);

    debug!(frame = %reply, to = %origin_port, "relaying slave response");
    send(origin, origin_port, reply, metrics).await?;
    metrics.frames_forwarded_total.inc();
    Ok(())
}

/// Drop slave frames that are already buffered, such as a reply that arrived after its
/// request timed out. They must not be paired with the next request.
fn discard_stale<S: FramePort>(slave: &mut S, metrics: &Metrics) -> Result<(), ProxyError> {
    while let Some(next) = slave.next().now_or_never() {
        match next {
            None => return Err(ProxyError::PortClosed(Port::Slave)),
            Some(Err(source)) => {
                return Err(ProxyError::Read {
                    port: Port::Slave,
                    source,
                })
            }
            Some(Ok(stale)) => {
                received(metrics, Port::Slave, &stale);
                warn!(frame = %stale, "dropping late slave reply");
                unexpected(metrics, Port::Slave, &stale);
            }
        }
    }
    Ok(())
}

async fn acknowledge<S: FramePort>(
    port: &mut S,
    role: Port,
    metrics: &Metrics,
) -> Result<(), ProxyError> {
    debug!(port = %role, "acknowledging locally");
    send(port, role, Frame::Single, metrics).await?;
    metrics.local_acks_total.inc();
    Ok(())
}

async fn send<S: FramePort>(
    port: &mut S,
    role: Port,
    frame: Frame,
    metrics: &Metrics,
) -> Result<(), ProxyError> {
    port.send(frame)
        .await
        .map_err(|source| ProxyError::Write { port: role, source })?;
    metrics
        .frames_sent_total
        .with_label_values(&[role.as_str()])
        .inc();
    Ok(())
}

fn received(metrics: &Metrics, port: Port, frame: &Frame) {
    debug!(%frame, %port, "received frame");
    metrics
        .frames_received_total
        .with_label_values(&[port.as_str()])
        .inc();
}

fn unexpected(metrics: &Metrics, port: Port, frame: &Frame) {
    error!(%frame, %port, "received unexpected frame");
    metrics
        .unexpected_frames_total
        .with_label_values(&[port.as_str()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::MbusCodec;
    use crate::protocol::control::{ADDRESS_SECONDARY, REQ_UD2};
    use crate::proxy::DEFAULT_LOCAL_SELECT_DATA;
    use std::time::Duration;
    use tokio_util::codec::{Decoder, Framed};

    type MockPort = Framed<tokio_test::io::Mock, MbusCodec>;

    struct MockBuilder(tokio_test::io::Builder);

    impl MockBuilder {
        fn new() -> Self {
            MockBuilder(tokio_test::io::Builder::new())
        }

        fn read(&mut self, frame: Frame) -> &mut Self {
            self.0.read(&frame.to_bytes().unwrap());
            self
        }

        fn write(&mut self, frame: Frame) -> &mut Self {
            self.0.write(&frame.to_bytes().unwrap());
            self
        }

        fn wait(&mut self, d: Duration) -> &mut Self {
            self.0.wait(d);
            self
        }

        fn build(&mut self) -> MockPort {
            MbusCodec::new().framed(self.0.build())
        }
    }

    fn mux(external: MockPort, slave: MockPort, local: MockPort) -> Multiplexer<MockPort> {
        Multiplexer::new(
            Routing::default(),
            Arc::new(Metrics::new().unwrap()),
            external,
            slave,
            local,
        )
    }

    fn req_ud2(address: u8) -> Frame {
        Frame::Short {
            control: REQ_UD2 | 0x20,
            address,
        }
    }

    fn rsp_ud(control_information: u8) -> Frame {
        Frame::Long {
            control: 0x08,
            address: 0x5A,
            control_information,
            data: vec![0xCA, 0xFE, 0xBA, 0xBE],
        }
    }

    async fn assert_drained(mux: Multiplexer<MockPort>) {
        let (mut external, mut slave, mut local) = mux.into_ports();
        assert!(external.next().await.is_none());
        assert!(slave.next().await.is_none());
        assert!(local.next().await.is_none());
    }

    #[tokio::test]
    async fn external_master_nke_is_acknowledged_locally() {
        for address in [0x5A, ADDRESS_BROADCAST] {
            let external = MockBuilder::new()
                .read(Frame::Short {
                    control: SND_NKE,
                    address,
                })
                .write(Frame::Single)
                .build();
            let mut m = mux(external, MockBuilder::new().build(), MockBuilder::new().build());

            m.step(&CancellationToken::new()).await.unwrap();
            assert_eq!(m.metrics.local_acks_total.get(), 1);
            assert_drained(m).await;
        }
    }

    #[tokio::test]
    async fn local_master_nke_is_acknowledged_locally() {
        let local = MockBuilder::new()
            .read(Frame::Short {
                control: SND_NKE,
                address: ADDRESS_UNCONFIGURED,
            })
            .write(Frame::Single)
            .read(Frame::Short {
                control: SND_NKE,
                address: ADDRESS_SECONDARY,
            })
            .write(Frame::Single)
            .build();
        let mut m = mux(MockBuilder::new().build(), MockBuilder::new().build(), local);

        let token = CancellationToken::new();
        m.step(&token).await.unwrap();
        m.step(&token).await.unwrap();
        assert_eq!(m.metrics.local_acks_total.get(), 2);
        assert_drained(m).await;
    }

    #[tokio::test]
    async fn local_master_secondary_selection_is_acknowledged() {
        let local = MockBuilder::new()
            .read(Frame::Long {
                control: SND_UD | 0x20,
                address: ADDRESS_SECONDARY,
                control_information: 0x52,
                data: DEFAULT_LOCAL_SELECT_DATA.to_vec(),
            })
            .write(Frame::Single)
            .build();
        let mut m = mux(MockBuilder::new().build(), MockBuilder::new().build(), local);

        m.step(&CancellationToken::new()).await.unwrap();
        assert_drained(m).await;
    }

    #[tokio::test]
    async fn external_master_request_is_forwarded() {
        let external = MockBuilder::new()
            .read(req_ud2(0x5A))
            .write(rsp_ud(0x72))
            .build();
        let slave = MockBuilder::new()
            .write(req_ud2(0x5A))
            .read(rsp_ud(0x72))
            .build();
        let mut m = mux(external, slave, MockBuilder::new().build());

        m.step(&CancellationToken::new()).await.unwrap();
        assert_eq!(m.metrics.frames_forwarded_total.get(), 1);
        assert_drained(m).await;
    }

    #[tokio::test]
    async fn requests_from_both_masters_are_interleaved() {
        let external = MockBuilder::new()
            .read(req_ud2(0x5A))
            .write(rsp_ud(0x72))
            .build();
        let slave = MockBuilder::new()
            .write(req_ud2(0x5A))
            .read(rsp_ud(0x72))
            .write(req_ud2(0x5A))
            .read(rsp_ud(0x73))
            .build();
        let local = MockBuilder::new()
            .read(req_ud2(ADDRESS_SECONDARY))
            .write(rsp_ud(0x73))
            .build();
        let mut m = mux(external, slave, local);

        let token = CancellationToken::new();
        m.step(&token).await.unwrap();
        m.step(&token).await.unwrap();
        assert_eq!(m.metrics.frames_forwarded_total.get(), 2);
        assert_drained(m).await;
    }

    #[tokio::test]
    async fn frames_for_other_slaves_are_ignored() {
        let external = MockBuilder::new().read(req_ud2(0x01)).build();
        let mut m = mux(external, MockBuilder::new().build(), MockBuilder::new().build());

        m.step(&CancellationToken::new()).await.unwrap();
        assert_eq!(m.metrics.frames_sent_total.with_label_values(&["slave"]).get(), 0);
        assert_drained(m).await;
    }

    #[tokio::test]
    async fn unsolicited_slave_frames_are_counted() {
        let slave = MockBuilder::new().read(Frame::Single).build();
        let mut m = mux(MockBuilder::new().build(), slave, MockBuilder::new().build());

        m.step(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            m.metrics
                .unexpected_frames_total
                .with_label_values(&["slave"])
                .get(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slave_timeout_is_not_fatal() {
        let external = MockBuilder::new().read(req_ud2(0x5A)).build();
        let slave = MockBuilder::new()
            .write(req_ud2(0x5A))
            .wait(Duration::from_secs(60))
            .build();
        let mut m = mux(external, slave, MockBuilder::new().build());

        m.step(&CancellationToken::new()).await.unwrap();
        assert_eq!(m.metrics.response_timeouts_total.get(), 1);
        assert_eq!(m.metrics.frames_forwarded_total.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_not_relayed_to_the_retry() {
        type PipePort = Framed<tokio::io::DuplexStream, MbusCodec>;
        fn pipe() -> (PipePort, PipePort) {
            let (a, b) = tokio::io::duplex(512);
            (MbusCodec::new().framed(a), MbusCodec::new().framed(b))
        }

        let (external, mut external_peer) = pipe();
        let (slave, mut slave_peer) = pipe();
        let (local, _local_peer) = pipe();
        let mut m = Multiplexer::new(
            Routing::default(),
            Arc::new(Metrics::new().unwrap()),
            external,
            slave,
            local,
        );
        let token = CancellationToken::new();

        external_peer.send(req_ud2(0x5A)).await.unwrap();
        m.step(&token).await.unwrap();
        assert_eq!(m.metrics.response_timeouts_total.get(), 1);
        assert_eq!(slave_peer.next().await.unwrap().unwrap(), req_ud2(0x5A));

        // answer to the first request arrives together with the retry
        slave_peer.send(rsp_ud(0x01)).await.unwrap();
        external_peer.send(req_ud2(0x5A)).await.unwrap();

        let slave_side = async {
            assert_eq!(slave_peer.next().await.unwrap().unwrap(), req_ud2(0x5A));
            slave_peer.send(rsp_ud(0x02)).await.unwrap();
        };
        let (result, ()) = tokio::join!(m.step(&token), slave_side);
        result.unwrap();

        assert_eq!(external_peer.next().await.unwrap().unwrap(), rsp_ud(0x02));
        assert_eq!(m.metrics.frames_forwarded_total.get(), 1);
        assert_eq!(
            m.metrics
                .unexpected_frames_total
                .with_label_values(&["slave"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn slave_closing_mid_exchange_is_fatal() {
        let external = MockBuilder::new().read(req_ud2(0x5A)).build();
        let slave = MockBuilder::new().write(req_ud2(0x5A)).build();
        let mut m = mux(external, slave, MockBuilder::new().build());

        let err = m.step(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::PortClosed(Port::Slave)));
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let external = MockBuilder::new().read(req_ud2(0x5A)).build();
        let mut m = mux(external, MockBuilder::new().build(), MockBuilder::new().build());
        let token = CancellationToken::new();
        token.cancel();

        m.step(&token).await.unwrap();
        m.run(&token).await.unwrap();

        // the pending request was never consumed
        let (mut external, _, _) = m.into_ports();
        assert_eq!(external.next().await.unwrap().unwrap(), req_ud2(0x5A));
    }

    #[tokio::test]
    async fn run_stops_when_every_port_is_closed() {
        let external = MockBuilder::new()
            .read(Frame::Short {
                control: SND_NKE,
                address: 0x5A,
            })
            .write(Frame::Single)
            .build();
        let mut m = mux(external, MockBuilder::new().build(), MockBuilder::new().build());

        let err = m.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::AllPortsClosed));
        assert_eq!(m.metrics.local_acks_total.get(), 1);
    }
}
