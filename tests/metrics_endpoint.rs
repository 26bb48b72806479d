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

use mbus_protocol::monitoring::http::serve_metrics;
use mbus_protocol::monitoring::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

#[tokio::test]
async fn serves_metrics_until_cancelled() {
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    metrics.local_acks_total.inc();
    metrics
        .frames_received_total
        .with_label_values(&["external_master"])
        .inc_by(3);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let token = CancellationToken::new();
    let server = tokio::spawn(serve_metrics(listener, metrics.clone(), token.clone()));

    let health = get(addr, "/healthz").await;
    assert!(health.starts_with("HTTP/1.1 200"));

    let body = get(addr, "/metrics").await;
    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("text/plain; version=0.0.4"));
    assert!(body.contains("mbus_local_acks_total 1"));
    assert!(body.contains("mbus_frames_received_total{port=\"external_master\"} 3"));

    token.cancel();
    server.await.expect("join").expect("serve");
}
