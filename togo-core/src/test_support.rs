// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Helpers for testing code that aborts the process.
//!
//! A fatal error can't be caught with `#[should_panic]`, so these helpers run
//! the test again in a child process (the same test binary, filtered down to
//! the one test), and inspect how the child exited. The child recognizes
//! itself by an environment variable and runs the closure instead of spawning
//! another child.

use std::{
    env,
    process::{self, Command, Output},
};

const CHILD_PROCESS_MARKER: &str = "TOGO_ISOLATED_TEST";

/// Runs `body` in a child process and asserts that it terminated through the
/// fatal error path. Returns the stderr of the child.
///
/// `module_path` should be `module_path!()` of the test module, and
/// `test_name` the name of the test function calling this.
#[track_caller]
pub fn expect_fatal(module_path: &str, test_name: &str, body: impl FnOnce()) -> String {
    let output = run_isolated(module_path, test_name, body);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    assert!(
        !output.status.success(),
        "{test_name} was expected to abort, but the child exited cleanly, stderr:\n{stderr}",
    );
    assert!(
        stderr.contains("fatal error"),
        "{test_name} did not exit through the fatal error path, stderr:\n{stderr}",
    );
    stderr
}

/// Runs `body` in a child process and asserts that it did not abort.
///
/// Used for tests that touch process-wide state, which can't be shared with
/// the other tests running in parallel.
#[track_caller]
pub fn expect_clean_exit(module_path: &str, test_name: &str, body: impl FnOnce()) {
    let output = run_isolated(module_path, test_name, body);
    assert!(
        output.status.success(),
        "{test_name} failed in the child process, stderr:\n{}",
        String::from_utf8_lossy(&output.stderr),
    );
}

fn run_isolated(module_path: &str, test_name: &str, body: impl FnOnce()) -> Output {
    if env::var_os(CHILD_PROCESS_MARKER).is_some() {
        body();
        // The harness would otherwise go on to print its summary and exit
        // with success anyway, exiting here keeps the child's output short.
        process::exit(0);
    }

    // Test names don't include the crate name, module_path!() does.
    let test_path = match module_path.split_once("::") {
        Some((_crate_name, path)) => format!("{path}::{test_name}"),
        None => test_name.to_string(),
    };
    let current_exe = env::current_exe().expect("the test binary should know its own path");
    Command::new(current_exe)
        .args([test_path.as_str(), "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_PROCESS_MARKER, "1")
        .output()
        .expect("the test binary should be able to spawn itself")
}
