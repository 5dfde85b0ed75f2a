//! Step-recording assertions for unit tests.
//!
//! Each test opens a [`TestReport`] with [`test_report!`]. Assertions are
//! recorded as they run; when a test panics the recorded trail is printed so
//! the failing step can be read in context. With `TEST_REPORT_DIR` set, every
//! trail is also written there as a text file.

use std::fmt::{Debug, Display};
use std::path::PathBuf;
use std::sync::Mutex;

/// Open a report named after the calling test function.
#[macro_export]
macro_rules! test_report {
    ($title:expr) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = &name[..name.len() - 3];
        let name = name.strip_suffix("::{{closure}}").unwrap_or(name);
        $crate::test_support::TestReport::new(name, $title)
    }};
}

const MAX_VALUE_LEN: usize = 400;

fn shorten(value: impl Debug) -> String {
    let text = format!("{:?}", value);
    if text.len() <= MAX_VALUE_LEN {
        return text;
    }
    let mut cut = MAX_VALUE_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... ({} bytes)", &text[..cut], text.len())
}

pub struct TestReport {
    name: String,
    title: String,
    steps: Mutex<Vec<(bool, String)>>,
}

impl TestReport {
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            steps: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, passed: bool, msg: String) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push((passed, msg));
        }
    }

    #[allow(dead_code)]
    pub fn note(&self, msg: impl Display) {
        self.record(true, format!("note: {}", msg));
    }

    pub fn assert_eq<A, E>(&self, label: &str, actual: &A, expected: &E)
    where
        A: PartialEq<E> + Debug,
        E: Debug,
    {
        let pass = actual == expected;
        self.record(
            pass,
            format!("{}: {} == {}", label, shorten(actual), shorten(expected)),
        );
        assert_eq!(actual, expected, "{}", label);
    }

    pub fn assert_true(&self, label: &str, value: bool) {
        self.record(value, label.to_string());
        assert!(value, "{}", label);
    }

    pub fn assert_contains(&self, label: &str, haystack: &str, needle: &str) {
        let pass = haystack.contains(needle);
        self.record(
            pass,
            format!("{}: {} contains {}", label, shorten(haystack), shorten(needle)),
        );
        assert!(pass, "{}: {:?} does not contain {:?}", label, haystack, needle);
    }

    fn trail(&self) -> String {
        let mut out = format!("{} ({})\n", self.title, self.name);
        if let Ok(steps) = self.steps.lock() {
            for (passed, msg) in steps.iter() {
                out.push_str(if *passed { "  ok   " } else { "  FAIL " });
                out.push_str(msg);
                out.push('\n');
            }
        }
        out
    }
}

impl Drop for TestReport {
    fn drop(&mut self) {
        let failed = std::thread::panicking();
        if failed {
            eprintln!("{}", self.trail());
        }

        if let Some(dir) = std::env::var_os("TEST_REPORT_DIR").map(PathBuf::from) {
            let status = if failed { "fail" } else { "pass" };
            let path = dir.join(format!("{}.txt", self.name.replace("::", "__")));
            let _ = std::fs::create_dir_all(&dir);
            let _ = std::fs::write(path, format!("{}result: {}\n", self.trail(), status));
        }
    }
}
