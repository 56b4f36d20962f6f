#![no_main]

use libfuzzer_sys::fuzz_target;
use typetest::runner::diagnostics::parse_diagnostics;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_diagnostics(s, std::path::Path::new("/fuzz"));
    }
});
