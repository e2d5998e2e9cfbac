//! Program output and the error channel.
//!
//! Output normally goes straight to stdout/stderr. Tests enable per-thread
//! capture to assert on what a script printed.

use std::cell::RefCell;

thread_local! {
    static CAPTURE: RefCell<Option<String>> = const { RefCell::new(None) };
    static ERROR_CAPTURE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Write to program output (no newline).
pub fn write(s: &str) {
    let captured = CAPTURE.with(|c| {
        let mut c = c.borrow_mut();
        match c.as_mut() {
            Some(buf) => {
                buf.push_str(s);
                true
            }
            None => false,
        }
    });
    if !captured {
        print!("{}", s);
    }
}

/// Write to program output with a trailing newline.
pub fn writeln(s: &str) {
    let captured = CAPTURE.with(|c| {
        let mut c = c.borrow_mut();
        match c.as_mut() {
            Some(buf) => {
                buf.push_str(s);
                buf.push('\n');
                true
            }
            None => false,
        }
    });
    if !captured {
        println!("{}", s);
    }
}

/// Write one line to the error channel.
pub fn error_line(s: &str) {
    let captured = ERROR_CAPTURE.with(|c| {
        let mut c = c.borrow_mut();
        match c.as_mut() {
            Some(buf) => {
                buf.push_str(s);
                buf.push('\n');
                true
            }
            None => false,
        }
    });
    if !captured {
        eprintln!("{}", s);
    }
}

/// Start capturing this thread's program output.
pub fn capture_begin() {
    CAPTURE.with(|c| *c.borrow_mut() = Some(String::new()));
}

/// Stop capturing and return everything captured since `capture_begin`.
pub fn capture_take() -> String {
    CAPTURE.with(|c| c.borrow_mut().take().unwrap_or_default())
}

/// Start capturing this thread's error channel.
pub fn capture_errors_begin() {
    ERROR_CAPTURE.with(|c| *c.borrow_mut() = Some(String::new()));
}

pub fn capture_errors_take() -> String {
    ERROR_CAPTURE.with(|c| c.borrow_mut().take().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_roundtrip() {
        capture_begin();
        writeln("hello");
        write("a");
        write("b");
        assert_eq!(capture_take(), "hello\nab");
    }

    #[test]
    fn test_error_capture_is_separate() {
        capture_begin();
        capture_errors_begin();
        writeln("out");
        error_line("err");
        assert_eq!(capture_take(), "out\n");
        assert_eq!(capture_errors_take(), "err\n");
    }
}
