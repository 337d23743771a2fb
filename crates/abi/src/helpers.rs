//! Small utilities for backend authors.
//!
//! Stubs receive raw argv arrays and plain text; these helpers turn them into
//! safe Rust values without each backend re-implementing the same loops.

use std::borrow::Cow;
use std::ffi::c_char;

use crate::cstr_to_str;

/// Number of entries in a null-terminated argv array (command name included).
///
/// # Safety
///
/// `argv` must be null or point to a null-terminated array of pointers.
pub unsafe fn arg_len(argv: *const *const c_char) -> usize {
    if argv.is_null() {
        return 0;
    }
    let mut len = 0;
    while !unsafe { *argv.add(len) }.is_null() {
        len += 1;
    }
    len
}

/// Collect a null-terminated argv array into text.
///
/// # Safety
///
/// `argv` must be null or point to a null-terminated array of NUL-terminated
/// strings that outlive `'a`.
pub unsafe fn collect_args<'a>(argv: *const *const c_char) -> Vec<Cow<'a, str>> {
    let len = unsafe { arg_len(argv) };
    (0..len)
        .filter_map(|i| unsafe { cstr_to_str(*argv.add(i)) })
        .collect()
}

/// Whether `args.len()` lies within `min..=max`.
pub fn check_args_len<S: AsRef<str>>(args: &[S], min: usize, max: usize) -> bool {
    (min..=max).contains(&args.len())
}

/// Parse a decimal integer with an optional sign.
pub fn parse_int(src: &str) -> Option<i64> {
    let digits = src.strip_prefix(['+', '-']).unwrap_or(src);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    src.parse().ok()
}

/// Parse a finite floating-point number.
pub fn parse_double(src: &str) -> Option<f64> {
    src.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// If `src` starts with the non-empty `prefix`, return the remainder.
pub fn starts_with<'a>(src: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    src.strip_prefix(prefix)
}
