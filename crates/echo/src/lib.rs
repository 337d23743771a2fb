//! Reference pl2 backend.
//!
//! Implements the full native-extension contract with a handful of
//! commands:
//!
//! - `echo <args...>` prints its arguments separated by spaces;
//! - `print <args...>` is a deprecated alias of `echo`;
//! - `skip` jumps over the next command;
//! - `exit` ends the run.
//!
//! Build it as a shared library and place it in the current directory or
//! under `PL2_HOME`, then start a program with `language pl2_ext_echo 1.0`.

use std::ffi::{c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use pl2_abi::helpers::collect_args;
use pl2_abi::{
    ABI_VERSION, Pl2Command, Pl2Error, Pl2Language, Pl2PCallCmd, Pl2Program, Pl2SInvokeCmd,
    Pl2SemVer,
};

/// Error code reported when the requested version is not 1.x.
pub const UNSUPPORTED_VERSION: u16 = 100;

/// Version implemented by this backend.
pub const VERSION: Pl2SemVer = Pl2SemVer::new(1, 0, 0);

// ── Descriptor ──────────────────────────────────────────────────────────

static DECLARED_VERSION: Pl2SemVer = VERSION;

/// Returned by stubs to end the run.
static TERMINATE: Pl2Command = Pl2Command::SENTINEL;

static SINVOKE: [Pl2SInvokeCmd; 3] = [
    Pl2SInvokeCmd {
        name: c"echo".as_ptr(),
        stub: Some(echo),
        deprecated: false,
        removed: false,
    },
    Pl2SInvokeCmd {
        name: c"print".as_ptr(),
        stub: Some(echo),
        deprecated: true,
        removed: false,
    },
    Pl2SInvokeCmd::SENTINEL,
];

static PCALL: [Pl2PCallCmd; 3] = [
    Pl2PCallCmd {
        name: c"skip".as_ptr(),
        router: None,
        stub: Some(skip),
        deprecated: false,
        removed: false,
    },
    Pl2PCallCmd {
        name: c"exit".as_ptr(),
        router: None,
        stub: Some(exit),
        deprecated: false,
        removed: false,
    },
    Pl2PCallCmd::SENTINEL,
];

static LANGUAGE: Pl2Language = Pl2Language {
    abi_version: ABI_VERSION,
    lang_name: c"Echo".as_ptr(),
    lang_info: c"Prints its arguments; reference backend for the pl2 ABI".as_ptr(),
    version: &DECLARED_VERSION,
    term_cmd: &TERMINATE,
    init: None,
    at_exit: None,
    sinvoke_cmds: SINVOKE.as_ptr(),
    pcall_cmds: PCALL.as_ptr(),
    fallback: None,
    cmd_cleanup: None,
};

// ── Entry point ─────────────────────────────────────────────────────────

/// Hand the descriptor to the host if it asks for a 1.x version.
///
/// # Safety
///
/// `error` must be null or point to a writable [`Pl2Error`].
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn pl2ext_loadLanguage(
    required: Pl2SemVer,
    error: *mut Pl2Error,
) -> *const Pl2Language {
    if required.major != VERSION.major {
        if let Some(error) = unsafe { error.as_mut() } {
            error.set(
                UNSUPPORTED_VERSION,
                &format!("echo implements version 1.x, not {}", required.major),
            );
        }
        return ptr::null();
    }
    &LANGUAGE
}

// ── Stubs ───────────────────────────────────────────────────────────────

/// Join the arguments after the command name.
pub fn render_line<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .skip(1)
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a stub body and swallow panics so they never unwind into the host.
fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or(fallback)
}

extern "C" fn echo(argv: *const *const c_char) {
    guard((), || {
        let args = unsafe { collect_args(argv) };
        println!("{}", render_line(&args));
    });
}

extern "C" fn skip(
    _program: *mut Pl2Program,
    _context: *mut c_void,
    command: *mut Pl2Command,
    _error: *mut Pl2Error,
) -> *mut Pl2Command {
    guard(ptr::null_mut(), || {
        let Some(command) = (unsafe { command.as_ref() }) else {
            return ptr::null_mut();
        };
        let Some(next) = (unsafe { command.next.as_ref() }) else {
            return ptr::null_mut();
        };
        if next.next.is_null() {
            // Nothing left after the skipped command.
            return (&raw const TERMINATE).cast_mut();
        }
        next.next
    })
}

extern "C" fn exit(
    _program: *mut Pl2Program,
    _context: *mut c_void,
    _command: *mut Pl2Command,
    _error: *mut Pl2Error,
) -> *mut Pl2Command {
    (&raw const TERMINATE).cast_mut()
}
