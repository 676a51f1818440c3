#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Errors are fine, panics are bugs.
    if let Ok(source) = std::str::from_utf8(data) {
        if let Ok(proto) = lunar_compiler::compile(source, "fuzz") {
            let _ = lunar_compiler::disasm::dump(&proto);
        }
    }
});
