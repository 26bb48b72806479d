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

//! Link-layer frame model and wire encoding.
//!
//! ## Formats
//!
//! ```text
//! single   E5
//! short    10 C A CS 16
//! control  68 03 03 68 C A CI CS 16
//! long     68 L L 68 C A CI <data: L-3 bytes> CS 16
//! ```
//!
//! `CS` is the 8-bit wrapping sum of every byte from `C` up to (excluding) `CS`.

use crate::protocol::parser::{self, FrameError, ParseError};
use std::fmt;
use std::iter::FusedIterator;

/// Single character acknowledgement.
pub const SINGLE_CHAR: u8 = 0xE5;
/// Start byte of a short frame.
pub const SHORT_START: u8 = 0x10;
/// Start byte of control and long frames (sent twice).
pub const LONG_START: u8 = 0x68;
/// Stop byte of every multi-byte frame.
pub const FRAME_END: u8 = 0x16;
/// Largest user data payload a long frame can carry (`L` is one byte and counts C, A and CI).
pub const MAX_DATA_LEN: usize = u8::MAX as usize - 3;

/// M-Bus link-layer frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub enum Frame {
    /// `E5` acknowledgement.
    Single,
    /// Fixed-length frame without CI field.
    Short {
        /// C field.
        control: u8,
        /// A field.
        address: u8,
    },
    /// Variable-length frame without user data (`L == 3`).
    Control {
        /// C field.
        control: u8,
        /// A field.
        address: u8,
        /// CI field.
        control_information: u8,
    },
    /// Variable-length frame with user data.
    Long {
        /// C field.
        control: u8,
        /// A field.
        address: u8,
        /// CI field.
        control_information: u8,
        /// User data, at most [`MAX_DATA_LEN`] bytes.
        data: Vec<u8>,
    },
}

/// Frame format discriminant, used for log fields and metric labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// [`Frame::Single`].
    Single,
    /// [`Frame::Short`].
    Short,
    /// [`Frame::Control`].
    Control,
    /// [`Frame::Long`].
    Long,
}

impl FrameKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Single => "single",
            FrameKind::Short => "short",
            FrameKind::Control => "control",
            FrameKind::Long => "long",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapping 8-bit sum used as the M-Bus checksum.
pub fn checksum<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u8 {
    bytes.into_iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

impl Frame {
    /// Parse exactly one frame from the start of `bytes`. Trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let (_, frame) = parser::parse_frame(bytes)?;
        Ok(frame)
    }

    /// Parse one frame and return the number of bytes it occupied.
    pub fn try_parse(bytes: &[u8]) -> Result<(usize, Self), ParseError> {
        let (rest, frame) = parser::parse_frame(bytes)?;
        Ok((bytes.len() - rest.len(), frame))
    }

    /// Lazily iterate over the wire encoding.
    ///
    /// The length byte of an oversized long frame is truncated; call [`Frame::validate`]
    /// (or use [`Frame::to_bytes`]) when the frame did not come from the parser.
    pub fn iter_bytes(&self) -> FrameBytes<'_> {
        FrameBytes {
            frame: self,
            index: 0,
            len: self.encoded_len(),
        }
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        self.validate()?;
        Ok(self.iter_bytes().collect())
    }

    /// Check that the frame is representable on the wire.
    pub fn validate(&self) -> Result<(), FrameError> {
        match self {
            Frame::Long { data, .. } if data.len() > MAX_DATA_LEN => {
                Err(FrameError::DataTooLong(data.len()))
            }
            _ => Ok(()),
        }
    }

    /// Number of bytes on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Single => 1,
            Frame::Short { .. } => 5,
            Frame::Control { .. } => 9,
            Frame::Long { data, .. } => 9 + data.len(),
        }
    }

    /// Format discriminant.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Single => FrameKind::Single,
            Frame::Short { .. } => FrameKind::Short,
            Frame::Control { .. } => FrameKind::Control,
            Frame::Long { .. } => FrameKind::Long,
        }
    }

    /// A field, if the format has one.
    pub fn address(&self) -> Option<u8> {
        match self {
            Frame::Single => None,
            Frame::Short { address, .. }
            | Frame::Control { address, .. }
            | Frame::Long { address, .. } => Some(*address),
        }
    }

    /// C field, if the format has one.
    pub fn control(&self) -> Option<u8> {
        match self {
            Frame::Single => None,
            Frame::Short { control, .. }
            | Frame::Control { control, .. }
            | Frame::Long { control, .. } => Some(*control),
        }
    }

    /// Same frame sent to another address. `Single` is returned unchanged.
    pub fn with_address(mut self, new_address: u8) -> Self {
        match &mut self {
            Frame::Single => {}
            Frame::Short { address, .. }
            | Frame::Control { address, .. }
            | Frame::Long { address, .. } => *address = new_address,
        }
        self
    }

    fn byte_at(&self, index: usize) -> u8 {
        match self {
            Frame::Single => SINGLE_CHAR,
            Frame::Short { control, address } => match index {
                0 => SHORT_START,
                1 => *control,
                2 => *address,
                3 => checksum(&[*control, *address]),
                _ => FRAME_END,
            },
            Frame::Control {
                control,
                address,
                control_information,
            } => match index {
                0 | 3 => LONG_START,
                1 | 2 => 3,
                4 => *control,
                5 => *address,
                6 => *control_information,
                7 => checksum(&[*control, *address, *control_information]),
                _ => FRAME_END,
            },
            Frame::Long {
                control,
                address,
                control_information,
                data,
            } => match index {
                0 | 3 => LONG_START,
                1 | 2 => (data.len() + 3) as u8,
                4 => *control,
                5 => *address,
                6 => *control_information,
                i if i < 7 + data.len() => data[i - 7],
                i if i == 7 + data.len() => {
                    checksum([*control, *address, *control_information].iter().chain(data))
                }
                _ => FRAME_END,
            },
        }
    }
}

impl<'a> TryFrom<&'a [u8]> for Frame {
    type Error = ParseError;

    fn try_from(bytes: &'a [u8]) -> Result<Self, Self::Error> {
        Frame::from_bytes(bytes)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Single => f.write_str("SINGLE"),
            Frame::Short { control, address } => {
                write!(f, "SHORT C={control:#04x} A={address:#04x}")
            }
            Frame::Control {
                control,
                address,
                control_information,
            } => write!(
                f,
                "CONTROL C={control:#04x} A={address:#04x} CI={control_information:#04x}"
            ),
            Frame::Long {
                control,
                address,
                control_information,
                data,
            } => write!(
                f,
                "LONG C={control:#04x} A={address:#04x} CI={control_information:#04x} data={} ({} bytes)",
                hex::encode(data),
                data.len()
            ),
        }
    }
}

/// Byte iterator returned by [`Frame::iter_bytes`].
#[derive(Clone, Debug)]
pub struct FrameBytes<'a> {
    frame: &'a Frame,
    index: usize,
    len: usize,
}

impl Iterator for FrameBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.index >= self.len {
            return None;
        }
        let b = self.frame.byte_at(self.index);
        self.index += 1;
        Some(b)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len - self.index;
        (n, Some(n))
    }
}

impl ExactSizeIterator for FrameBytes<'_> {}
impl FusedIterator for FrameBytes<'_> {}
