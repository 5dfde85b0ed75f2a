#![no_main]

use libfuzzer_sys::fuzz_target;
use rerouter::redirect::{normalize, PatchRule, TargetOrigin, UrlRewriter};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Fields separated by NUL: target, original URL, then find/replace pairs
    let mut fields = input.split('\0');
    let (Some(target), Some(original)) = (fields.next(), fields.next()) else {
        return;
    };

    let once = normalize(target, Some(8080));
    assert_eq!(normalize(&once, Some(8080)), once);

    let Ok(origin) = TargetOrigin::parse(target) else {
        return;
    };
    let rest: Vec<&str> = fields.collect();
    let patches = rest
        .chunks(2)
        .map(|pair| PatchRule::new(pair[0], pair.get(1).copied().unwrap_or_default()))
        .collect();

    let rewriter = UrlRewriter::new(origin, patches);
    let first = rewriter.rewrite(original);
    let second = rewriter.rewrite(original);
    assert_eq!(first.is_ok(), second.is_ok());
    if let (Ok(a), Ok(b)) = (first, second) {
        assert_eq!(a, b);
    }
});
