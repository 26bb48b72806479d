// Copyright (c) 2026 The mbus-protocol Authors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! C and A field values used for routing.

/// Frame count bit of the C field (toggles between successive requests).
pub const FCB: u8 = 0x20;
/// Frame count valid bit.
pub const FCV: u8 = 0x10;

/// Link reset (initialize slave).
pub const SND_NKE: u8 = 0x40;
/// Send user data to slave.
pub const SND_UD: u8 = 0x53;
/// Request class 1 data.
pub const REQ_UD1: u8 = 0x5A;
/// Request class 2 data.
pub const REQ_UD2: u8 = 0x5B;
/// Slave response with user data.
pub const RSP_UD: u8 = 0x08;

/// Address of a slave that has not been configured.
pub const ADDRESS_UNCONFIGURED: u8 = 0x00;
/// Address of the slave selected through secondary addressing.
pub const ADDRESS_SECONDARY: u8 = 0xFD;
/// Broadcast, all slaves reply (only valid with a single slave on the bus).
pub const ADDRESS_BROADCAST_REPLY: u8 = 0xFE;
/// Broadcast, no slave replies.
pub const ADDRESS_BROADCAST: u8 = 0xFF;

/// True if `control` encodes `function`, ignoring the FCB bit.
pub fn is_function(control: u8, function: u8) -> bool {
    control & !FCB == function & !FCB
}

/// True for addresses that reach more than one slave.
pub fn is_broadcast(address: u8) -> bool {
    matches!(address, ADDRESS_BROADCAST_REPLY | ADDRESS_BROADCAST)
}
