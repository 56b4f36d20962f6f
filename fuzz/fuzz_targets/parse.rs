#![no_main]

use libfuzzer_sys::fuzz_target;
use typetest::Collector;

fuzz_target!(|data: &[u8]| {
    // Convert bytes to UTF-8 string (ignore invalid UTF-8)
    if let Ok(s) = std::str::from_utf8(data) {
        // Parsing must never panic, and every collected range must stay inside the source
        if typetest_syntax::parse_source(s).is_ok() {
            let info = Collector::new("/fuzz").collect_source(std::path::Path::new("/fuzz/a.test-d.ts"), s.to_string());
            for definition in &info.definitions {
                assert!(definition.start <= definition.end && definition.end <= s.len());
            }
        }
    }
});
