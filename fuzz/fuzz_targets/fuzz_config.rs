#![no_main]

use libfuzzer_sys::fuzz_target;
use rerouter::Config;

fuzz_target!(|data: &[u8]| {
    let input = match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    // Parse errors are fine; a parsed config must build its parts without panicking
    if let Ok(config) = Config::parse(input) {
        let _ = config.endpoint();
        let _ = config.redirector();
        let _ = config.patches();
    }
});
