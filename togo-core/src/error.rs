// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The engine-wide fatal error path.
//!
//! Everything that is considered a bug in the caller ends up in
//! [`error_abort`], usually through [`fatal!`](crate::fatal) or
//! [`assert_fatal!`](crate::assert_fatal). The process is terminated with
//! [`std::process::abort`], so these errors can't be caught or unwound
//! through.

use std::{
    fmt,
    io::{self, Write},
};

/// Prints `"<file> @ <line>: fatal error: <message>"` to stderr, flushes it,
/// and aborts the process.
///
/// This does not go through `tracing`, so the message is printed even if no
/// subscriber has been installed (or if the subscriber filters out errors).
#[cold]
#[inline(never)]
pub fn error_abort(line: u32, file: &str, args: fmt::Arguments) -> ! {
    let mut stderr = io::stderr().lock();
    // Write errors are ignored, there's nowhere left to report them.
    let _ = writeln!(stderr, "{file} @ {line}: fatal error: {args}");
    let _ = stderr.flush();
    std::process::abort()
}

/// Aborts the process with a formatted message, see [`error_abort`].
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::error::error_abort(line!(), file!(), format_args!($($arg)+))
    };
}

/// Aborts the process if the condition is false.
///
/// The message contains the stringified condition and the optional formatted
/// message:
///
/// ```text
/// src/memory.rs @ 42: fatal error: Assertion failed: `size != 0`
/// Assertion message: allocation size must be non-zero
/// ```
#[macro_export]
macro_rules! assert_fatal {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::error::error_abort(
                line!(),
                file!(),
                format_args!("Assertion failed: `{}`", stringify!($cond)),
            )
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::error_abort(
                line!(),
                file!(),
                format_args!(
                    "Assertion failed: `{}`\nAssertion message: {}",
                    stringify!($cond),
                    format_args!($($arg)+),
                ),
            )
        }
    };
}

/// [`assert_fatal!`](crate::assert_fatal) that is only checked when
/// `debug_assertions` are enabled.
#[macro_export]
macro_rules! debug_assert_fatal {
    ($($arg:tt)+) => {
        if cfg!(debug_assertions) {
            $crate::assert_fatal!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::test_support::expect_fatal;

    #[test]
    fn fatal_prints_file_and_line() {
        let stderr = expect_fatal(module_path!(), "fatal_prints_file_and_line", || {
            crate::fatal!("the answer is {}", 42);
        });
        assert!(stderr.contains("error.rs @ "), "unexpected stderr: {stderr}");
        assert!(
            stderr.contains(": fatal error: the answer is 42"),
            "unexpected stderr: {stderr}",
        );
    }

    #[test]
    fn failed_assertion_prints_condition_and_message() {
        let stderr = expect_fatal(
            module_path!(),
            "failed_assertion_prints_condition_and_message",
            || {
                let size = 0;
                crate::assert_fatal!(size != 0, "size was {}", size);
            },
        );
        assert!(
            stderr.contains("Assertion failed: `size != 0`"),
            "unexpected stderr: {stderr}",
        );
        assert!(
            stderr.contains("Assertion message: size was 0"),
            "unexpected stderr: {stderr}",
        );
    }

    #[test]
    fn passing_assertion_does_nothing() {
        let size = 1;
        crate::assert_fatal!(size != 0);
        crate::assert_fatal!(size == 1, "size was {}", size);
        crate::debug_assert_fatal!(size > 0);
    }
}
