//! Numeric diagnostic codes.
//!
//! Codes are stable across releases: hosts and backends exchange them as raw
//! `u16` values over the native-extension boundary. `0` means "no error",
//! `1..USER_BASE` is reserved for the platform, and everything from
//! [`ErrorCode::USER_BASE`] upward belongs to backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A numeric diagnostic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    /// No error.
    pub const NONE: ErrorCode = ErrorCode(0);
    /// General hard error.
    pub const GENERAL: ErrorCode = ErrorCode(1);
    /// A logical line holds more fragments than the parse buffer allows.
    pub const FRAGMENT_BUFFER_EXCEEDED: ErrorCode = ErrorCode(2);
    /// A quoted string was not closed before the end of its line.
    pub const UNCLOSED_STRING: ErrorCode = ErrorCode(3);
    /// Input ended inside a `?begin` block.
    pub const UNCLOSED_BLOCK: ErrorCode = ErrorCode(4);
    /// Empty command (reserved).
    pub const EMPTY_COMMAND: ErrorCode = ErrorCode(5);
    /// Malformed semantic version.
    pub const SEMVER_PARSE: ErrorCode = ErrorCode(6);
    /// Unknown `?` directive.
    pub const UNKNOWN_DIRECTIVE: ErrorCode = ErrorCode(7);
    /// A backend could not be loaded.
    pub const LOAD_LANGUAGE_FAILED: ErrorCode = ErrorCode(8);
    /// A user command ran before any backend was loaded.
    pub const NO_LANGUAGE_LOADED: ErrorCode = ErrorCode(9);
    /// No dispatch table entry or fallback handled a command.
    pub const UNKNOWN_COMMAND: ErrorCode = ErrorCode(10);
    /// Allocation failure (reserved).
    pub const OUT_OF_MEMORY: ErrorCode = ErrorCode(11);
    /// A character that cannot start a token.
    pub const UNEXPECTED_CHARACTER: ErrorCode = ErrorCode(12);
    /// A deprecated dispatch entry was used.
    pub const DEPRECATED_COMMAND: ErrorCode = ErrorCode(13);
    /// A dispatch entry matched but carries no stub.
    pub const EMPTY_ENTRY: ErrorCode = ErrorCode(14);
    /// A backend redirected execution to a command that does not exist.
    pub const INVALID_REDIRECT: ErrorCode = ErrorCode(15);
    /// First code of the backend-defined range.
    pub const USER_BASE: ErrorCode = ErrorCode(100);

    /// Every platform-defined code, in numeric order.
    pub const ALL: [ErrorCode; 16] = [
        Self::NONE,
        Self::GENERAL,
        Self::FRAGMENT_BUFFER_EXCEEDED,
        Self::UNCLOSED_STRING,
        Self::UNCLOSED_BLOCK,
        Self::EMPTY_COMMAND,
        Self::SEMVER_PARSE,
        Self::UNKNOWN_DIRECTIVE,
        Self::LOAD_LANGUAGE_FAILED,
        Self::NO_LANGUAGE_LOADED,
        Self::UNKNOWN_COMMAND,
        Self::OUT_OF_MEMORY,
        Self::UNEXPECTED_CHARACTER,
        Self::DEPRECATED_COMMAND,
        Self::EMPTY_ENTRY,
        Self::INVALID_REDIRECT,
    ];

    /// Raw numeric value.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether this code represents an error at all.
    pub const fn is_error(self) -> bool {
        self.0 != 0
    }

    /// Whether this code lies in the backend-defined range.
    pub const fn is_user(self) -> bool {
        self.0 >= Self::USER_BASE.0
    }

    /// Short identifier such as `PL0008`, used in rendered output.
    pub fn id(self) -> String {
        format!("PL{:04}", self.0)
    }

    /// Human-readable explanation of the code, if it is platform-defined.
    ///
    /// Backend-defined codes have no platform explanation.
    pub fn explain(self) -> Option<&'static str> {
        let text = match self {
            Self::NONE => "no error",
            Self::GENERAL => "a general hard error that fits no narrower category",
            Self::FRAGMENT_BUFFER_EXCEEDED => {
                "a single logical line (or ?begin/?end block) holds more parts than the \
                 parse buffer allows; split the command or raise the fragment capacity"
            }
            Self::UNCLOSED_STRING => {
                "a quoted string was not closed with \" or ' before the end of its line"
            }
            Self::UNCLOSED_BLOCK => "input ended inside a ?begin block without a matching ?end",
            Self::EMPTY_COMMAND => "an empty command was encountered (reserved)",
            Self::SEMVER_PARSE => {
                "a version string is not of the form [^]major[.minor[.patch]][-prerelease]"
            }
            Self::UNKNOWN_DIRECTIVE => {
                "a line starting with ? names an operator other than begin or end"
            }
            Self::LOAD_LANGUAGE_FAILED => {
                "the language directive failed: wrong argument count, a backend is already \
                 loaded, the library was not found, its entry point is missing, or the \
                 backend rejected the requested version"
            }
            Self::NO_LANGUAGE_LOADED => {
                "a command ran before any language directive loaded a backend; the command \
                 was skipped"
            }
            Self::UNKNOWN_COMMAND => {
                "the loaded backend has no dispatch entry or fallback handler for the command"
            }
            Self::OUT_OF_MEMORY => "an allocation failed (reserved)",
            Self::UNEXPECTED_CHARACTER => {
                "a character that cannot start a bare token or a quoted string was found"
            }
            Self::DEPRECATED_COMMAND => "the backend marks this command as deprecated",
            Self::EMPTY_ENTRY => {
                "the backend declares this command but provides no implementation; it was \
                 skipped"
            }
            Self::INVALID_REDIRECT => {
                "a backend stub redirected execution to a command outside the program"
            }
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl From<u16> for ErrorCode {
    fn from(raw: u16) -> Self {
        ErrorCode(raw)
    }
}
