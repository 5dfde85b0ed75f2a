#![no_main]

use libfuzzer_sys::fuzz_target;
use rerouter::redirect::DomainMatcher;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Last line is the hostname, the rest are patterns
    let mut lines: Vec<&str> = input.lines().collect();
    let Some(hostname) = lines.pop() else {
        return;
    };

    let matcher = DomainMatcher::new(&lines);
    let matched = matcher.matches(hostname);

    // Every non-blank exact pattern matches itself
    for pattern in &lines {
        let pattern = pattern.trim();
        if !pattern.is_empty() && !pattern.starts_with('.') && !pattern.starts_with("*.") {
            assert!(matcher.matches(pattern));
        }
    }
    assert_eq!(matched, rerouter::redirect::domain::matches(hostname, &lines));
});
