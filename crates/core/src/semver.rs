//! Semantic versions used to gate backend loading.
//!
//! Syntax: `[^]major[.minor[.patch]][-prerelease]`. A leading `^` pins the
//! version exactly; omitted minor and patch components are zero.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use pl2_abi::{PRERELEASE_CAPACITY, Pl2SemVer};
use pl2_diagnostics::{Diagnostic, ErrorCode};
use serde::{Deserialize, Serialize};

/// Longest accepted prerelease tag, in bytes.
pub const MAX_PRERELEASE_LEN: usize = PRERELEASE_CAPACITY - 1;

/// Why a version string was rejected.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemVerError {
    /// A numeric component was expected but not found.
    #[error("missing {component} version")]
    MissingComponent {
        /// `major`, `minor`, or `patch`.
        component: &'static str,
    },
    /// A numeric component does not fit in 16 bits.
    #[error("{component} version out of range")]
    Overflow {
        /// `major`, `minor`, or `patch`.
        component: &'static str,
    },
    /// A character other than `.`, `-`, or end of input followed a component.
    #[error("expected {expected}, got `{found}`")]
    UnexpectedCharacter {
        /// What would have been accepted.
        expected: &'static str,
        /// What was found.
        found: char,
    },
    /// `-` was not followed by a tag.
    #[error("empty prerelease tag")]
    EmptyPrerelease,
    /// The prerelease tag is longer than [`MAX_PRERELEASE_LEN`].
    #[error("prerelease tag longer than {MAX_PRERELEASE_LEN} bytes")]
    PrereleaseTooLong,
    /// The prerelease tag contains a NUL byte.
    #[error("prerelease tag contains a NUL byte")]
    NulInPrerelease,
}

impl From<SemVerError> for Diagnostic {
    fn from(e: SemVerError) -> Self {
        Diagnostic::error(ErrorCode::SEMVER_PARSE, e.to_string())
    }
}

/// A semantic version with an optional prerelease tag and exact pin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemVer {
    /// Major component.
    pub major: u16,
    /// Minor component.
    pub minor: u16,
    /// Patch component.
    pub patch: u16,
    prerelease: Option<String>,
    /// Caret-pinned: only an identical triple satisfies this requirement.
    pub exact: bool,
}

impl SemVer {
    /// A stable-looking version with no tag and no pin.
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            exact: false,
        }
    }

    /// `0.0.0` with no tag and no pin.
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// Whether this is exactly [`SemVer::zero`].
    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Attach a prerelease tag (builder pattern).
    pub fn with_prerelease(mut self, tag: &str) -> Result<Self, SemVerError> {
        if tag.is_empty() {
            return Err(SemVerError::EmptyPrerelease);
        }
        if tag.len() > MAX_PRERELEASE_LEN {
            return Err(SemVerError::PrereleaseTooLong);
        }
        if tag.contains('\0') {
            return Err(SemVerError::NulInPrerelease);
        }
        self.prerelease = Some(tag.to_owned());
        Ok(self)
    }

    /// Set the exact pin (builder pattern).
    pub fn pinned(mut self) -> Self {
        self.exact = true;
        self
    }

    /// The prerelease tag, if any.
    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }

    /// Whether the version carries a prerelease tag.
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// No prerelease tag and a non-zero major version.
    pub fn is_stable(&self) -> bool {
        !self.is_prerelease() && self.major != 0
    }

    /// Parse `[^]major[.minor[.patch]][-prerelease]`.
    pub fn parse(src: &str) -> Result<Self, SemVerError> {
        let (exact, rest) = match src.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, src),
        };
        let mut ver = SemVer {
            exact,
            ..SemVer::zero()
        };

        let (major, mut rest) = parse_component(rest, "major")?;
        ver.major = major;
        for (slot, component) in [(&mut ver.minor, "minor"), (&mut ver.patch, "patch")] {
            match rest.chars().next() {
                None | Some('-') => break,
                Some('.') => {
                    let (value, tail) = parse_component(&rest[1..], component)?;
                    *slot = value;
                    rest = tail;
                }
                Some(found) => {
                    return Err(SemVerError::UnexpectedCharacter {
                        expected: "`.` or `-`",
                        found,
                    });
                }
            }
        }

        match rest.chars().next() {
            None => Ok(ver),
            Some('-') => ver.with_prerelease(&rest[1..]),
            Some(found) => Err(SemVerError::UnexpectedCharacter {
                expected: "`-` or end of version",
                found,
            }),
        }
    }

    /// Whether `given` satisfies this requirement.
    ///
    /// Prerelease tags must match exactly. An exact requirement needs an
    /// identical triple; otherwise the major versions must match and `given`
    /// must be at least as new.
    pub fn is_compatible(&self, given: &SemVer) -> bool {
        if self.prerelease != given.prerelease {
            return false;
        }
        if self.exact {
            return (self.major, self.minor, self.patch)
                == (given.major, given.minor, given.patch);
        }
        self.major == given.major
            && (given.minor > self.minor
                || (given.minor == self.minor && given.patch >= self.patch))
    }

    /// Order two versions by `(major, minor, patch)`.
    ///
    /// Versions with different prerelease tags are incomparable.
    pub fn compare(&self, other: &SemVer) -> Option<Ordering> {
        if self.prerelease != other.prerelease {
            return None;
        }
        Some((self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch)))
    }

    /// Convert to the boundary representation.
    pub fn to_abi(&self) -> Pl2SemVer {
        let mut out = Pl2SemVer::new(self.major, self.minor, self.patch);
        out.exact = self.exact;
        if let Some(tag) = &self.prerelease
            && let Some(tagged) = out.with_prerelease(tag)
        {
            out = tagged;
        }
        out
    }

    /// Convert from the boundary representation.
    pub fn from_abi(raw: &Pl2SemVer) -> Result<Self, SemVerError> {
        let ver = SemVer {
            exact: raw.exact,
            ..SemVer::new(raw.major, raw.minor, raw.patch)
        };
        match raw.prerelease() {
            Some(tag) => ver.with_prerelease(&tag),
            None => Ok(ver),
        }
    }
}

fn parse_component<'a>(src: &'a str, component: &'static str) -> Result<(u16, &'a str), SemVerError> {
    let digits = src.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(SemVerError::MissingComponent { component });
    }
    let value = src[..digits]
        .parse::<u16>()
        .map_err(|_| SemVerError::Overflow { component })?;
    Ok((value, &src[digits..]))
}

impl FromStr for SemVer {
    type Err = SemVerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemVer::parse(s)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exact {
            f.write_str("^")?;
        }
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.prerelease {
            write!(f, "-{tag}")?;
        }
        Ok(())
    }
}
