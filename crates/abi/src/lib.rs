//! The pl2 native-extension contract.
//!
//! A backend is a shared library exporting [`ENTRY_POINT`]. The host calls it
//! with the version requested by the `language` directive and an error
//! out-parameter; the backend answers with a pointer to a [`Pl2Language`]
//! descriptor that stays valid until the library is unloaded.
//!
//! Minimal backends may instead export [`EASY_LOAD_ENTRY_POINT`], returning a
//! null-terminated list of command names, plus one `pl2ez_<name>` stub per
//! listed name (see [`Pl2EasyStub`]).
//!
//! Every table in a descriptor is terminated by an all-zero sentinel entry.
//! All layouts here are `#[repr(C)]` and frozen for a given [`ABI_VERSION`].

pub mod helpers;

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_void};
use std::ptr;

pub use pl2_diagnostics::REASON_CAPACITY;

// ── Constants ────────────────────────────────────────────────────────────

/// Layout version of [`Pl2Language`] and everything it points to.
pub const ABI_VERSION: u32 = 1;

/// Symbol name of the full-contract entry point (NUL-terminated).
pub const ENTRY_POINT: &[u8] = b"pl2ext_loadLanguage\0";

/// Symbol name of the easy-load entry point (NUL-terminated).
pub const EASY_LOAD_ENTRY_POINT: &[u8] = b"pl2ezload\0";

/// Prefix of the per-command stubs exported by easy-load backends.
pub const EASY_STUB_PREFIX: &str = "pl2ez_";

/// Size of the prerelease buffer in [`Pl2SemVer`], terminator included.
pub const PRERELEASE_CAPACITY: usize = 15;

// ── Function signatures ──────────────────────────────────────────────────

/// Simple-invoke stub. `argv` holds the command name followed by each
/// argument's decoded text and is terminated by a null pointer.
pub type Pl2SInvokeStub = extern "C" fn(argv: *const *const c_char);

/// Program-call stub, also used for the fallback handler.
///
/// Returns the next command to run, null to advance linearly, or the
/// descriptor's `term_cmd` to end the run. Setting a non-zero code in
/// `error` halts the run with that error.
pub type Pl2PCallStub = extern "C" fn(
    program: *mut Pl2Program,
    context: *mut c_void,
    command: *mut Pl2Command,
    error: *mut Pl2Error,
) -> *mut Pl2Command;

/// Router predicate: receives the full command name, returns whether the
/// program-call entry applies.
pub type Pl2RouterStub = extern "C" fn(name: *const c_char) -> bool;

/// Initialization hook. Returns the opaque backend context.
pub type Pl2InitStub = extern "C" fn(error: *mut Pl2Error) -> *mut c_void;

/// At-exit hook. Receives the context produced by the init hook.
pub type Pl2AtExitStub = extern "C" fn(context: *mut c_void);

/// Per-command cleanup hook, called once for every non-null command
/// `extra_data` slot after the at-exit hook.
pub type Pl2CmdCleanupStub = extern "C" fn(extra_data: *mut c_void);

/// Signature of the symbol named by [`ENTRY_POINT`].
pub type Pl2EntryPoint =
    unsafe extern "C" fn(version: Pl2SemVer, error: *mut Pl2Error) -> *const Pl2Language;

/// Signature of the symbol named by [`EASY_LOAD_ENTRY_POINT`].
pub type Pl2EasyLoadEntryPoint = unsafe extern "C" fn() -> *const *const c_char;

/// Signature of an easy-load `pl2ez_<name>` stub.
pub type Pl2EasyStub = Pl2SInvokeStub;

// ── SemVer ───────────────────────────────────────────────────────────────

/// A semantic version as exchanged over the boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pl2SemVer {
    /// Major component.
    pub major: u16,
    /// Minor component.
    pub minor: u16,
    /// Patch component.
    pub patch: u16,
    /// NUL-terminated prerelease tag; all zero when absent.
    pub prerelease: [c_char; PRERELEASE_CAPACITY],
    /// Caret-pinned (exact) matching.
    pub exact: bool,
}

impl Pl2SemVer {
    /// A version with no prerelease tag and no exact pin.
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: [0; PRERELEASE_CAPACITY],
            exact: false,
        }
    }

    /// Copy `tag` into the prerelease buffer.
    ///
    /// Returns `None` if the tag is empty, too long, or contains NUL.
    pub fn with_prerelease(mut self, tag: &str) -> Option<Self> {
        if tag.is_empty() || tag.len() >= PRERELEASE_CAPACITY || tag.contains('\0') {
            return None;
        }
        self.prerelease = [0; PRERELEASE_CAPACITY];
        for (slot, byte) in self.prerelease.iter_mut().zip(tag.bytes()) {
            *slot = byte as c_char;
        }
        Some(self)
    }

    /// The prerelease tag, or `None` when absent.
    pub fn prerelease(&self) -> Option<Cow<'_, str>> {
        let len = self
            .prerelease
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(PRERELEASE_CAPACITY);
        if len == 0 {
            return None;
        }
        let bytes: Vec<u8> = self.prerelease[..len].iter().map(|&c| c as u8).collect();
        Some(Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

// ── Source info and errors ───────────────────────────────────────────────

/// A source location as exchanged over the boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Pl2SourceInfo {
    /// NUL-terminated file name, or null.
    pub file_name: *const c_char,
    /// 1-based line number; `0` when unknown.
    pub line: u32,
}

impl Default for Pl2SourceInfo {
    fn default() -> Self {
        Self {
            file_name: ptr::null(),
            line: 0,
        }
    }
}

/// Error out-parameter threaded through every fallible boundary call.
///
/// `code == 0` means "no error". The reason buffer is always NUL-terminated.
#[repr(C)]
pub struct Pl2Error {
    /// Backend-owned payload. The host never frees it.
    pub extra_data: *mut c_void,
    /// Where the error happened, if the backend knows.
    pub source: Pl2SourceInfo,
    /// Numeric error code (see `pl2_diagnostics::ErrorCode`).
    pub code: u16,
    /// NUL-terminated, possibly truncated message.
    pub reason: [c_char; REASON_CAPACITY],
}

impl Default for Pl2Error {
    fn default() -> Self {
        Self {
            extra_data: ptr::null_mut(),
            source: Pl2SourceInfo::default(),
            code: 0,
            reason: [0; REASON_CAPACITY],
        }
    }
}

impl std::fmt::Debug for Pl2Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pl2Error")
            .field("code", &self.code)
            .field("reason", &self.reason())
            .field("line", &self.source.line)
            .finish_non_exhaustive()
    }
}

impl Pl2Error {
    /// Whether an error has been recorded.
    pub fn is_error(&self) -> bool {
        self.code != 0
    }

    /// Record an error, truncating `reason` to fit the buffer.
    pub fn set(&mut self, code: u16, reason: &str) {
        self.code = code;
        self.reason = [0; REASON_CAPACITY];
        let mut len = reason.len().min(REASON_CAPACITY - 1);
        while !reason.is_char_boundary(len) {
            len -= 1;
        }
        for (slot, byte) in self.reason.iter_mut().zip(reason.as_bytes()[..len].iter()) {
            *slot = *byte as c_char;
        }
    }

    /// The recorded message.
    pub fn reason(&self) -> Cow<'_, str> {
        let len = self
            .reason
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(REASON_CAPACITY);
        let bytes: Vec<u8> = self.reason[..len].iter().map(|&c| c as u8).collect();
        Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ── Program mirror ───────────────────────────────────────────────────────

/// One command part.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Pl2CmdPart {
    /// NUL-terminated decoded text. Null only in the argument terminator.
    pub text: *const c_char,
    /// Whether the part came from a quoted string.
    pub is_string: bool,
}

impl Pl2CmdPart {
    /// The terminator that ends every argument array.
    pub const TERMINATOR: Pl2CmdPart = Pl2CmdPart {
        text: ptr::null(),
        is_string: false,
    };
}

/// A command as seen by program-call stubs.
///
/// Commands of one program live in a single contiguous array, so `prev` and
/// `next` are neighbours in [`Pl2Program::commands`] (null at the ends).
#[repr(C)]
#[derive(Debug)]
pub struct Pl2Command {
    /// Previous command, or null.
    pub prev: *mut Pl2Command,
    /// Next command, or null.
    pub next: *mut Pl2Command,
    /// Backend-owned per-command slot, released through the cleanup hook.
    pub extra_data: *mut c_void,
    /// Location of the command in its source file.
    pub source: Pl2SourceInfo,
    /// The command name.
    pub cmd: Pl2CmdPart,
    /// Arguments, terminated by [`Pl2CmdPart::TERMINATOR`].
    pub args: *const Pl2CmdPart,
}

impl Pl2Command {
    /// An unlinked, empty command. Backends use a static one of these as
    /// their terminate sentinel.
    pub const SENTINEL: Pl2Command = Pl2Command {
        prev: ptr::null_mut(),
        next: ptr::null_mut(),
        extra_data: ptr::null_mut(),
        source: Pl2SourceInfo {
            file_name: ptr::null(),
            line: 0,
        },
        cmd: Pl2CmdPart::TERMINATOR,
        args: ptr::null(),
    };
}

/// The parsed program as seen by program-call stubs.
#[repr(C)]
#[derive(Debug)]
pub struct Pl2Program {
    /// First element of the command array, or null for an empty program.
    pub commands: *mut Pl2Command,
    /// Number of commands in the array.
    pub count: usize,
}

// ── Descriptor ───────────────────────────────────────────────────────────

/// A simple-invoke table entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Pl2SInvokeCmd {
    /// NUL-terminated command name. Null only in the sentinel.
    pub name: *const c_char,
    /// Implementation; `None` marks a declared but empty entry.
    pub stub: Option<Pl2SInvokeStub>,
    /// Log a warning whenever the entry is used.
    pub deprecated: bool,
    /// Skip the entry during lookup.
    pub removed: bool,
}

impl Pl2SInvokeCmd {
    /// The all-zero table terminator.
    pub const SENTINEL: Pl2SInvokeCmd = Pl2SInvokeCmd {
        name: ptr::null(),
        stub: None,
        deprecated: false,
        removed: false,
    };

    /// Whether this is the table terminator.
    pub fn is_sentinel(&self) -> bool {
        self.name.is_null() && self.stub.is_none()
    }
}

/// A program-call table entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Pl2PCallCmd {
    /// NUL-terminated command name. Null only in the sentinel.
    pub name: *const c_char,
    /// Optional predicate further restricting when the entry applies.
    pub router: Option<Pl2RouterStub>,
    /// Implementation; `None` marks a declared but empty entry.
    pub stub: Option<Pl2PCallStub>,
    /// Log a warning whenever the entry is used.
    pub deprecated: bool,
    /// Skip the entry during lookup.
    pub removed: bool,
}

impl Pl2PCallCmd {
    /// The all-zero table terminator.
    pub const SENTINEL: Pl2PCallCmd = Pl2PCallCmd {
        name: ptr::null(),
        router: None,
        stub: None,
        deprecated: false,
        removed: false,
    };

    /// Whether this is the table terminator.
    pub fn is_sentinel(&self) -> bool {
        self.name.is_null() && self.router.is_none() && self.stub.is_none()
    }
}

/// A backend descriptor.
#[repr(C)]
#[derive(Debug)]
pub struct Pl2Language {
    /// Must equal [`ABI_VERSION`].
    pub abi_version: u32,
    /// NUL-terminated display name.
    pub lang_name: *const c_char,
    /// NUL-terminated description, or null.
    pub lang_info: *const c_char,
    /// Version the backend implements, or null when undeclared.
    pub version: *const Pl2SemVer,
    /// Terminate sentinel; null when the backend never terminates by pointer.
    pub term_cmd: *const Pl2Command,
    /// Optional initialization hook.
    pub init: Option<Pl2InitStub>,
    /// Optional at-exit hook.
    pub at_exit: Option<Pl2AtExitStub>,
    /// Simple-invoke table, or null.
    pub sinvoke_cmds: *const Pl2SInvokeCmd,
    /// Program-call table, or null.
    pub pcall_cmds: *const Pl2PCallCmd,
    /// Optional fallback handler.
    pub fallback: Option<Pl2PCallStub>,
    /// Optional per-command cleanup hook.
    pub cmd_cleanup: Option<Pl2CmdCleanupStub>,
}

// Descriptors, their tables, and the terminate sentinel are immutable once
// published and are only read from the dispatch thread.
unsafe impl Sync for Pl2Language {}
unsafe impl Sync for Pl2SInvokeCmd {}
unsafe impl Sync for Pl2PCallCmd {}
unsafe impl Sync for Pl2Command {}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Convert a C string pointer to text. Returns `None` if null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<Cow<'a, str>> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy())
}
