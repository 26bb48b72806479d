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

//! Streaming frame parser.
//!
//! Built on `nom` streaming combinators: a truncated frame yields
//! [`ParseError::Incomplete`] with the number of additional bytes required before
//! the parser can make progress, never a hard error.

use crate::protocol::frame::{checksum, Frame, FRAME_END, LONG_START, SHORT_START, SINGLE_CHAR};
use nom::{
    bytes::streaming::{tag, take},
    combinator::map,
    error::{ErrorKind, ParseError as NomParseError},
    number::streaming::u8 as byte,
    sequence::tuple,
    Err, IResult,
};
use thiserror::Error;

pub use nom::Needed;

/// Malformed frame errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Received checksum differs from the computed one.
    #[error("checksum mismatch (computed {expected:#04x}, received {actual:#04x})")]
    MalformedChecksum {
        /// Checksum computed over the received fields.
        expected: u8,
        /// Checksum byte on the wire.
        actual: u8,
    },
    /// The two L fields of a long frame disagree.
    #[error("inconsistent length values ({first} != {second})")]
    InconsistentLengthValues {
        /// First L byte.
        first: u8,
        /// Second L byte.
        second: u8,
    },
    /// L field cannot cover C, A and CI.
    #[error("length field {0} below minimum of 3")]
    LengthTooShort(u8),
    /// Byte after the checksum is not the stop byte.
    #[error("expected stop byte 0x16, found {0:#04x}")]
    MissingStop(u8),
    /// Byte where a start byte was expected is not one.
    #[error("unexpected start byte {0:#04x}")]
    UnexpectedStart(u8),
    /// User data does not fit into the one-byte L field.
    #[error("user data of {0} bytes exceeds the 252 byte limit")]
    DataTooLong(usize),
    /// Lower-level combinator failure.
    #[error("parser error: {0:?}")]
    Syntax(ErrorKind),
}

impl<'a> NomParseError<&'a [u8]> for FrameError {
    fn from_error_kind(_: &'a [u8], kind: ErrorKind) -> Self {
        FrameError::Syntax(kind)
    }

    fn append(_: &'a [u8], _: ErrorKind, other: Self) -> Self {
        other
    }
}

/// Result of parsing a frame from a byte buffer.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    /// More input is needed. `Needed::Size(n)` counts bytes beyond those already given.
    #[error("incomplete frame ({0:?})")]
    Incomplete(Needed),
    /// Input is not a valid frame.
    #[error(transparent)]
    Invalid(#[from] FrameError),
}

impl From<Err<FrameError>> for ParseError {
    fn from(e: Err<FrameError>) -> Self {
        match e {
            Err::Incomplete(needed) => ParseError::Incomplete(needed),
            Err::Error(e) | Err::Failure(e) => ParseError::Invalid(e),
        }
    }
}

type PResult<'a, T> = IResult<&'a [u8], T, FrameError>;

/// Take `len` bytes followed by their checksum; a mismatch is a failure.
fn checksummed<'a>(len: usize) -> impl FnMut(&'a [u8]) -> PResult<'a, &'a [u8]> {
    move |i| {
        let (i, body) = take(len)(i)?;
        let (i, actual) = byte(i)?;
        let expected = checksum(body);
        if expected != actual {
            return Err(Err::Failure(FrameError::MalformedChecksum { expected, actual }));
        }
        Ok((i, body))
    }
}

fn stop(i: &[u8]) -> PResult<'_, ()> {
    let (i, b) = byte(i)?;
    if b != FRAME_END {
        return Err(Err::Failure(FrameError::MissingStop(b)));
    }
    Ok((i, ()))
}

fn single(i: &[u8]) -> PResult<'_, Frame> {
    map(tag(&[SINGLE_CHAR][..]), |_| Frame::Single)(i)
}

fn short_frame(i: &[u8]) -> PResult<'_, Frame> {
    let (i, (_, body, _)) = tuple((tag(&[SHORT_START][..]), checksummed(2), stop))(i)?;
    Ok((
        i,
        Frame::Short {
            control: body[0],
            address: body[1],
        },
    ))
}

fn long_frame(i: &[u8]) -> PResult<'_, Frame> {
    let (i, _) = tag(&[LONG_START][..])(i)?;
    let (i, first) = byte(i)?;
    let (i, second) = byte(i)?;
    if first != second {
        return Err(Err::Failure(FrameError::InconsistentLengthValues { first, second }));
    }
    if first < 3 {
        return Err(Err::Failure(FrameError::LengthTooShort(first)));
    }
    let (i, start) = byte(i)?;
    if start != LONG_START {
        return Err(Err::Failure(FrameError::UnexpectedStart(start)));
    }
    let (i, body) = checksummed(first as usize)(i)?;
    let (i, _) = stop(i)?;

    let frame = if body.len() == 3 {
        Frame::Control {
            control: body[0],
            address: body[1],
            control_information: body[2],
        }
    } else {
        Frame::Long {
            control: body[0],
            address: body[1],
            control_information: body[2],
            data: body[3..].to_vec(),
        }
    };
    Ok((i, frame))
}

/// Parse one frame from the start of `i`, dispatching on the start byte.
pub fn parse_frame(i: &[u8]) -> PResult<'_, Frame> {
    let (_, start) = byte(i)?;
    match start {
        SINGLE_CHAR => single(i),
        SHORT_START => short_frame(i),
        LONG_START => long_frame(i),
        other => Err(Err::Failure(FrameError::UnexpectedStart(other))),
    }
}
