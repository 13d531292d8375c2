#![no_main]
use dhcp4_core::options::ParsedOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|fuzz: &[u8]| {
    let mut opts = ParsedOptions::new();
    opts.parse(fuzz, &[], &[]);
    for code in 0u8..=255 {
        let _ = opts.get(code);
    }
});
