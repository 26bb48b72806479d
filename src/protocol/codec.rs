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

//! `tokio-util` codec turning a byte stream into [`Frame`]s.

use crate::protocol::frame::Frame;
use crate::protocol::parser::{Needed, ParseError};
use bytes::{Buf, BytesMut};
use std::io::{Error, ErrorKind};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

/// Frame codec.
///
/// In strict mode (the default) malformed input is an `InvalidData` error, which ends a
/// `Framed` stream. In resynchronising mode the codec drops one byte at a time until a
/// valid frame starts at the head of the buffer.
#[derive(Clone, Debug, Default)]
pub struct MbusCodec {
    /// Buffer length required before parsing again.
    required: usize,
    resync: bool,
    discarded: u64,
    /// Bytes dropped since the last decoded frame.
    skipping: u64,
}

impl MbusCodec {
    /// Strict codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that skips garbage instead of failing.
    pub fn resynchronizing() -> Self {
        Self {
            resync: true,
            ..Self::default()
        }
    }

    /// Bytes dropped while resynchronising.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn skip_byte(&mut self, src: &mut BytesMut, reason: &dyn std::fmt::Display) {
        if self.skipping == 0 {
            warn!(%reason, byte = src[0], "lost frame sync, discarding bytes");
        } else {
            trace!(%reason, byte = src[0], "discarding byte");
        }
        src.advance(1);
        self.required = 0;
        self.skipping += 1;
        self.discarded += 1;
    }
}

impl Decoder for MbusCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.is_empty() || src.len() < self.required {
                return Ok(None);
            }

            match Frame::try_parse(src.chunk()) {
                Ok((consumed, frame)) => {
                    trace!(%frame, consumed, "decoded frame");
                    src.advance(consumed);
                    self.required = 0;
                    if self.skipping > 0 {
                        debug!(skipped = self.skipping, "frame sync recovered");
                        self.skipping = 0;
                    }
                    return Ok(Some(frame));
                }
                Err(ParseError::Incomplete(Needed::Size(n))) => {
                    self.required = src.len() + n.get();
                    return Ok(None);
                }
                Err(ParseError::Incomplete(Needed::Unknown)) => {
                    self.required = src.len() + 1;
                    return Ok(None);
                }
                Err(ParseError::Invalid(err)) if self.resync => self.skip_byte(src, &err),
                Err(ParseError::Invalid(err)) => {
                    self.required = 0;
                    return Err(Error::new(ErrorKind::InvalidData, err));
                }
            }
        }
    }

    /// At end of input a resynchronising codec drops truncated frame headers one byte at
    /// a time so that frames behind them are still decoded.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.decode(src)? {
                Some(frame) => return Ok(Some(frame)),
                None if src.is_empty() => return Ok(None),
                None if self.resync => self.skip_byte(src, &"truncated frame at end of input"),
                None => return Err(Error::new(ErrorKind::Other, "bytes remaining on stream")),
            }
        }
    }
}

impl Encoder<Frame> for MbusCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.validate()
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;
        trace!(frame = %item, "encoding frame");

        dst.reserve(item.encoded_len());
        dst.extend(item.iter_bytes());
        Ok(())
    }
}
