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

use mbus_protocol::protocol::frame::MAX_DATA_LEN;
use mbus_protocol::{Frame, FrameError, ParseError};
use proptest::prelude::*;
use proptest::sample::Index;

fn arb_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        Just(Frame::Single),
        (any::<u8>(), any::<u8>()).prop_map(|(control, address)| Frame::Short { control, address }),
        (any::<u8>(), any::<u8>(), any::<u8>()).prop_map(|(control, address, control_information)| {
            Frame::Control {
                control,
                address,
                control_information,
            }
        }),
        (
            any::<u8>(),
            any::<u8>(),
            any::<u8>(),
            prop::collection::vec(any::<u8>(), 1..=MAX_DATA_LEN)
        )
            .prop_map(|(control, address, control_information, data)| Frame::Long {
                control,
                address,
                control_information,
                data,
            }),
    ]
}

proptest! {
    #[test]
    fn encoded_frames_parse_back(frame in arb_frame()) {
        let bytes = frame.to_bytes().unwrap();
        prop_assert_eq!(bytes.len(), frame.encoded_len());

        let (consumed, parsed) = Frame::try_parse(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(parsed, frame);
    }

    #[test]
    fn every_strict_prefix_is_incomplete(frame in arb_frame(), cut in any::<Index>()) {
        let bytes = frame.to_bytes().unwrap();
        let end = cut.index(bytes.len());
        prop_assert!(matches!(
            Frame::try_parse(&bytes[..end]),
            Err(ParseError::Incomplete(_))
        ));
    }

    #[test]
    fn corrupted_checksum_is_detected(
        frame in arb_frame().prop_filter("single has no checksum", |f| *f != Frame::Single),
        delta in 1u8..=255,
    ) {
        let mut bytes = frame.to_bytes().unwrap();
        let cs = bytes.len() - 2;
        bytes[cs] = bytes[cs].wrapping_add(delta);
        let is_checksum_error = matches!(
            Frame::from_bytes(&bytes),
            Err(ParseError::Invalid(FrameError::MalformedChecksum { .. }))
        );
        prop_assert!(is_checksum_error);
    }

    #[test]
    fn arbitrary_input_reencodes_to_consumed_bytes(bytes in prop::collection::vec(any::<u8>(), 0..300)) {
        if let Ok((consumed, frame)) = Frame::try_parse(&bytes) {
            prop_assert!(consumed <= bytes.len());
            prop_assert_eq!(frame.to_bytes().unwrap(), bytes[..consumed].to_vec());
        }
    }
}
