// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use mbus_protocol::{Frame, FrameError};

fuzz_target!(|frame: Frame| {
    let bytes = match frame.to_bytes() {
        Ok(b) => b,
        Err(FrameError::DataTooLong(_)) => return,
        Err(e) => panic!("unexpected encode error: {e}"),
    };
    assert_eq!(bytes.len(), frame.encoded_len());

    // an empty long frame is indistinguishable from a control frame on the wire
    let expected = match frame {
        Frame::Long {
            control,
            address,
            control_information,
            data,
        } if data.is_empty() => Frame::Control {
            control,
            address,
            control_information,
        },
        other => other,
    };
    assert_eq!(Frame::from_bytes(&bytes).expect("encoded frame parses"), expected);
});
