#![no_main]
use libfuzzer_sys::fuzz_target;

use roastery::{parse, Registry};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let registry = Registry::new();
        let _ = parse(text, "fuzz.journal", &registry);
    }
});
