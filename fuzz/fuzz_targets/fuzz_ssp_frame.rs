#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};

use kiosk_cash_core::ssp::frame::receive;
use kiosk_cash_core::transport::SerialLink;

#[path = "fuzz_support.rs"]
mod fuzz_support;
use fuzz_support::FuzzPort;

fuzz_target!(|data: &[u8]| {
    let link = SerialLink::from_port(Box::new(FuzzPort::new(data)));
    let _ = receive(&link, Instant::now() + Duration::from_millis(20));
});
