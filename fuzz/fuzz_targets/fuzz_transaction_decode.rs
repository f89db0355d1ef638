//! Fuzz target for socket request decoding.
//!
//! Arbitrary frames must decode to a request or an error, and any decoded
//! code must resolve to a transaction kind or a rejection, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_service::ipc::protocol::{decode_request, DEFAULT_MAX_FRAME_SIZE};
use statsd_service::ipc::TransactionKind;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = decode_request(data, DEFAULT_MAX_FRAME_SIZE) {
        let _ = TransactionKind::from_code(request.code);
    }
});
