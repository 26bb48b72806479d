// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use mbus_protocol::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok((consumed, frame)) = Frame::try_parse(data) {
        let bytes = frame.to_bytes().expect("parsed frames are encodable");
        assert_eq!(bytes, &data[..consumed]);
    }
});
