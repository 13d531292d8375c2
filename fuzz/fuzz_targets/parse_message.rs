#![no_main]
use dhcp4_core::message::RawMessage;
use dhcp4_core::options::ParsedOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|fuzz: &[u8]| {
    if let Ok(msg) = RawMessage::new(fuzz) {
        let mut opts = ParsedOptions::new();
        msg.parse_options(&mut opts);
    }
});
