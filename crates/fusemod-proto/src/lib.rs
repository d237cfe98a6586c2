// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FuseMod Protocol: control channel framing and message schemas
//!
//! This crate defines the binary frame format exchanged over the two
//! unidirectional control streams, the command and notification payloads
//! carried inside frames, the shared error-code vocabulary, and a
//! controller-side client used by CLI tools and tests.

pub mod client;
pub mod frame;
pub mod messages;
pub mod validation;

// Re-export key types
pub use client::{content_capacity, ClientError, ControlClient, Event};
pub use frame::{
    crc16_ccitt, decode_and_validate, decode_header, decode_header_as, encode, encode_as,
    encode_request, Frame, FrameError, FrameHeader, FrameReader, FrameRole, FRAME_OVERHEAD,
    HEADER_LEN, MAX_FRAME_SIZE, MAX_PAYLOAD_LEN, REQUEST_MAGIC, RESPONSE_MAGIC, TRAILER_MAGIC,
};
pub use messages::{
    CapabilityFlags, Command, ErrorCode, MessageType, WriteNotification, STATUS_OK,
};
pub use validation::*;
