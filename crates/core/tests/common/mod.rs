//! Shared test helpers for `pl2_core` integration tests.

#![allow(unreachable_pub)]

use std::cell::RefCell;
use std::rc::Rc;

use pl2_core::{Program, parse_str};

// ─── Parse helpers ───────────────────────────────────────────────────────────

/// Parse `src`, panicking with the diagnostic on failure.
#[allow(dead_code)]
pub fn parse(src: &str) -> Program {
    parse_str(src).unwrap_or_else(|e| panic!("parse failed: {e}"))
}

/// Command names in program order.
#[allow(dead_code)]
pub fn names(program: &Program) -> Vec<String> {
    program.iter().map(|c| c.name().text.clone()).collect()
}

/// Arguments of the command at `index` as `(text, is_string)` pairs.
#[allow(dead_code)]
pub fn args(program: &Program, index: usize) -> Vec<(String, bool)> {
    program
        .iter()
        .nth(index)
        .unwrap_or_else(|| panic!("no command at index {index}"))
        .args()
        .iter()
        .map(|a| (a.text.clone(), a.is_string))
        .collect()
}

// ─── Call recording ──────────────────────────────────────────────────────────

/// An append-only event log shared between a test and its backend closures.
#[derive(Debug, Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

#[allow(dead_code)]
impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == event).count()
    }
}
