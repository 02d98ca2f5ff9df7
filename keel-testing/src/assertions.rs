// Test assertions for keel results

use keel_core::{ErrorKind, Result};
use std::fmt::Debug;

/// Assert that a result failed with a specific error kind
pub fn assert_error_kind<T: Debug>(result: &Result<T>, expected: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected {} error, got Ok({:?})", expected, value),
        Err(err) => assert_eq!(
            err.kind(),
            expected,
            "Expected {} error, got {}: {}",
            expected,
            err.kind(),
            err
        ),
    }
}

/// Assert that a result succeeded and return the value
pub fn assert_ok<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("Expected Ok, got {} error: {}", err.kind(), err),
    }
}

/// Assert that a result failed with an error whose message contains `needle`
pub fn assert_error_contains<T: Debug>(result: &Result<T>, needle: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}', got Ok({:?})", needle, value),
        Err(err) => assert!(
            err.to_string().contains(needle),
            "Expected error containing '{}', got: {}",
            needle,
            err
        ),
    }
}
