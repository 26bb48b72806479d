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

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mbus_protocol::{Frame, MbusCodec, ParseError};
use tokio_util::codec::Decoder;

#[derive(Clone, Debug, Arbitrary)]
struct Input {
    bytes: Vec<u8>,
    /// Read sizes the stream is delivered in (each + 1).
    chunks: Vec<u8>,
}

/// Frames a single pass over the whole buffer yields, and whether it ended on bad input.
fn one_shot(mut rest: &[u8]) -> (Vec<Frame>, bool) {
    let mut frames = Vec::new();
    loop {
        match Frame::try_parse(rest) {
            Ok((n, frame)) => {
                frames.push(frame);
                rest = &rest[n..];
            }
            Err(ParseError::Incomplete(_)) => return (frames, false),
            Err(ParseError::Invalid(_)) => return (frames, true),
        }
    }
}

fuzz_target!(|inp: Input| {
    let (expected, expect_error) = one_shot(&inp.bytes);

    let mut codec = MbusCodec::new();
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let mut errored = false;

    let mut remaining = &inp.bytes[..];
    let mut sizes = inp.chunks.iter().map(|&c| c as usize + 1);
    'feed: while !remaining.is_empty() {
        let n = sizes.next().unwrap_or(remaining.len()).min(remaining.len());
        buf.extend_from_slice(&remaining[..n]);
        remaining = &remaining[n..];

        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => decoded.push(frame),
                Ok(None) => break,
                Err(_) => {
                    errored = true;
                    break 'feed;
                }
            }
        }
    }

    assert_eq!(decoded, expected);
    assert_eq!(errored, expect_error);
});
