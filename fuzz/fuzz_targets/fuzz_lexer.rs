#![no_main]

use libfuzzer_sys::fuzz_target;
use lunar_compiler::lexer::tokenize;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let _ = tokenize(source);
    }
});
