//! Adapting native descriptors into [`Language`] values.
//!
//! Everything here trusts only what it has checked: tables are scanned up to
//! a fixed bound and must end in their sentinel, and pointers returned by
//! program-call stubs are mapped back to command ids before use.
//!
//! The closures built here call into the library that produced the
//! descriptor. They must be dropped before that library is unloaded; the
//! engine guarantees this ordering.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CString, c_char, c_void};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use pl2_abi::{
    ABI_VERSION, EASY_STUB_PREFIX, Pl2CmdCleanupStub, Pl2CmdPart, Pl2Command, Pl2EasyLoadEntryPoint,
    Pl2EasyStub, Pl2EntryPoint, Pl2Error, Pl2Language, Pl2PCallCmd, Pl2PCallStub, Pl2Program,
    Pl2SInvokeCmd, Pl2SInvokeStub, Pl2SourceInfo, cstr_to_str,
};
use pl2_diagnostics::{Diagnostic, ErrorCode, REASON_CAPACITY, Severity};

use super::LoadError;
use crate::grammar::ast::{CommandId, Program};
use crate::language::{BackendContext, Language, Next, PCallEntry, PCallFn, SInvokeEntry};
use crate::semver::SemVer;

/// Upper bound on entries scanned in any backend-supplied table.
pub const MAX_TABLE_ENTRIES: usize = 4096;

/// Longest command name an easy-load backend may declare.
pub const MAX_EASY_NAME_LEN: usize = REASON_CAPACITY - EASY_STUB_PREFIX.len() - 2;

/// The backend context handed to native stubs.
#[derive(Debug)]
pub(crate) struct ForeignContext(*mut c_void);

impl ForeignContext {
    fn from_context(ctx: &mut BackendContext) -> *mut c_void {
        ctx.downcast_mut::<ForeignContext>()
            .map_or(ptr::null_mut(), |c| c.0)
    }
}

// ── Text conversion ─────────────────────────────────────────────────────

/// Convert text for the boundary, truncating at the first interior NUL.
pub(crate) fn to_c_string(s: &str) -> CString {
    let bytes = s.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    CString::new(&bytes[..end]).unwrap_or_default()
}

/// Copy a backend error into a diagnostic, or `None` if no error was set.
pub(crate) fn error_from_abi(err: &Pl2Error) -> Option<Diagnostic> {
    if !err.is_error() {
        return None;
    }
    let mut diag = Diagnostic::new(ErrorCode(err.code), Severity::Error, err.reason());
    if !err.extra_data.is_null() {
        diag = diag.with_context(BTreeMap::from([(
            "backend_extra_data".to_string(),
            "present".to_string(),
        )]));
    }
    Some(diag)
}

// ── Program mirror ──────────────────────────────────────────────────────

/// A C view of a [`Program`], built once per run on first use.
///
/// Every pointer handed to the backend points into heap storage owned here,
/// so moving the struct does not invalidate them.
struct ForeignProgram {
    _files: Vec<CString>,
    _texts: Vec<CString>,
    _args: Vec<Box<[Pl2CmdPart]>>,
    commands: Box<[Pl2Command]>,
    raw: Box<Pl2Program>,
}

impl ForeignProgram {
    fn build(program: &Program) -> Self {
        let mut files: Vec<CString> = Vec::new();
        let mut last_file: Option<Arc<str>> = None;
        let mut texts = Vec::new();
        let mut args_storage = Vec::with_capacity(program.len());
        let mut commands = Vec::with_capacity(program.len());

        for cmd in program {
            let same_file = last_file
                .as_ref()
                .is_some_and(|f| Arc::ptr_eq(f, &cmd.source().file));
            if !same_file {
                files.push(to_c_string(&cmd.source().file));
                last_file = Some(Arc::clone(&cmd.source().file));
            }
            let file_name = files.last().map_or(ptr::null(), |f| f.as_ptr());

            let mut part = |text: &str, is_string: bool| {
                let c = to_c_string(text);
                let part = Pl2CmdPart {
                    text: c.as_ptr(),
                    is_string,
                };
                texts.push(c);
                part
            };
            let name = part(cmd.name().as_str(), cmd.name().is_string);
            let args: Box<[Pl2CmdPart]> = cmd
                .args()
                .iter()
                .map(|a| part(a.as_str(), a.is_string))
                .chain(std::iter::once(Pl2CmdPart::TERMINATOR))
                .collect();

            commands.push(Pl2Command {
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                extra_data: ptr::null_mut(),
                source: Pl2SourceInfo {
                    file_name,
                    line: cmd.line(),
                },
                cmd: name,
                args: args.as_ptr(),
            });
            args_storage.push(args);
        }

        let mut commands = commands.into_boxed_slice();
        let base = commands.as_mut_ptr();
        let count = commands.len();
        for (i, cmd) in commands.iter_mut().enumerate() {
            if i > 0 {
                cmd.prev = base.wrapping_add(i - 1);
            }
            if i + 1 < count {
                cmd.next = base.wrapping_add(i + 1);
            }
        }
        let raw = Box::new(Pl2Program {
            commands: if count == 0 { ptr::null_mut() } else { base },
            count,
        });

        Self {
            _files: files,
            _texts: texts,
            _args: args_storage,
            commands,
            raw,
        }
    }

    fn command_ptr(&mut self, id: CommandId) -> *mut Pl2Command {
        self.commands
            .get_mut(id.index())
            .map_or(ptr::null_mut(), |c| c as *mut Pl2Command)
    }

    /// Map a pointer returned by a stub back to a command id.
    fn locate(&self, ptr: *const Pl2Command) -> Option<CommandId> {
        let base = self.commands.as_ptr() as usize;
        let addr = ptr as usize;
        let size = std::mem::size_of::<Pl2Command>();
        let offset = addr.checked_sub(base)?;
        if offset % size != 0 {
            return None;
        }
        let index = offset / size;
        (index < self.commands.len()).then_some(CommandId::new(index))
    }

    fn extra_data_slots(&self) -> impl Iterator<Item = *mut c_void> + '_ {
        self.commands
            .iter()
            .map(|c| c.extra_data)
            .filter(|p| !p.is_null())
    }
}

/// State shared by every closure of one native language.
struct Shared {
    id: String,
    term_cmd: *const Pl2Command,
    cmd_cleanup: Option<Pl2CmdCleanupStub>,
    mirror: RefCell<Option<ForeignProgram>>,
}

impl Shared {
    fn call(
        &self,
        stub: Pl2PCallStub,
        program: &mut Program,
        ctx: &mut BackendContext,
        id: CommandId,
    ) -> Result<Next, Diagnostic> {
        let mut mirror = self.mirror.borrow_mut();
        let mirror = mirror.get_or_insert_with(|| ForeignProgram::build(&*program));
        let cmd_ptr = mirror.command_ptr(id);
        let program_ptr: *mut Pl2Program = &mut *mirror.raw;
        let mut err = Pl2Error::default();

        let ret = stub(
            program_ptr,
            ForeignContext::from_context(ctx),
            cmd_ptr,
            &mut err,
        );

        if let Some(diag) = error_from_abi(&err) {
            return Err(diag);
        }
        if !self.term_cmd.is_null() && ptr::eq(ret, self.term_cmd) {
            return Ok(Next::Terminate);
        }
        if ret.is_null() {
            return Ok(Next::Advance);
        }
        mirror.locate(ret).map(Next::Jump).ok_or_else(|| {
            Diagnostic::error(
                ErrorCode::INVALID_REDIRECT,
                format!(
                    "language `{}` redirected to a command outside the program",
                    self.id
                ),
            )
        })
    }

    fn pcall_fn(self: &Rc<Self>, stub: Pl2PCallStub) -> PCallFn {
        let shared = Rc::clone(self);
        Rc::new(
            move |program: &mut Program, ctx: &mut BackendContext, id: CommandId| {
                shared.call(stub, program, ctx, id)
            },
        )
    }

    fn cleanup(&self) {
        let Some(cleanup) = self.cmd_cleanup else {
            return;
        };
        if let Some(mirror) = self.mirror.borrow_mut().take() {
            for slot in mirror.extra_data_slots() {
                cleanup(slot);
            }
        }
    }
}

// ── Stub wrappers ───────────────────────────────────────────────────────

fn sinvoke_fn(stub: Pl2SInvokeStub) -> Rc<dyn Fn(&[&str])> {
    Rc::new(move |argv: &[&str]| {
        let owned: Vec<CString> = argv.iter().map(|s| to_c_string(s)).collect();
        let ptrs: Vec<*const c_char> = owned
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        stub(ptrs.as_ptr());
    })
}

fn router_fn(router: pl2_abi::Pl2RouterStub) -> Rc<dyn Fn(&str) -> bool> {
    Rc::new(move |name: &str| {
        let name = to_c_string(name);
        router(name.as_ptr())
    })
}

// ── Table scanning ──────────────────────────────────────────────────────

fn invalid(id: &str, reason: impl Into<String>) -> LoadError {
    LoadError::InvalidDescriptor {
        id: id.to_string(),
        reason: reason.into(),
    }
}

/// Read a sentinel-terminated table of at most [`MAX_TABLE_ENTRIES`] entries.
///
/// # Safety
///
/// `table` must be null or point to entries readable up to the sentinel or
/// the bound, whichever comes first.
unsafe fn scan_table<T: Copy>(
    id: &str,
    what: &str,
    table: *const T,
    is_sentinel: impl Fn(&T) -> bool,
) -> Result<Vec<T>, LoadError> {
    if table.is_null() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for i in 0..MAX_TABLE_ENTRIES {
        let entry = unsafe { *table.add(i) };
        if is_sentinel(&entry) {
            return Ok(out);
        }
        out.push(entry);
    }
    Err(invalid(
        id,
        format!("{what} table has no sentinel within {MAX_TABLE_ENTRIES} entries"),
    ))
}

/// # Safety
///
/// `name` must be null or a valid NUL-terminated string.
unsafe fn entry_name(id: &str, what: &str, name: *const c_char) -> Result<String, LoadError> {
    unsafe { cstr_to_str(name) }
        .map(|n| n.into_owned())
        .ok_or_else(|| invalid(id, format!("{what} entry without a name")))
}

// ── Full contract ───────────────────────────────────────────────────────

/// Call a full-contract entry point and adapt the returned descriptor.
///
/// # Safety
///
/// `entry` must be the `pl2ext_loadLanguage` symbol of a library honouring
/// the contract, and that library must outlive the returned [`Language`].
pub(crate) unsafe fn load_full(
    id: &str,
    entry: Pl2EntryPoint,
    required: &SemVer,
) -> Result<Language, LoadError> {
    let mut err = Pl2Error::default();
    let desc_ptr = unsafe { entry(required.to_abi(), &mut err) };
    if let Some(diagnostic) = error_from_abi(&err) {
        return Err(LoadError::Rejected {
            id: id.to_string(),
            diagnostic,
        });
    }
    if desc_ptr.is_null() {
        return Err(invalid(id, "entry point returned no descriptor"));
    }
    let desc: &Pl2Language = unsafe { &*desc_ptr };
    if desc.abi_version != ABI_VERSION {
        return Err(invalid(
            id,
            format!(
                "ABI version {} is not supported (expected {ABI_VERSION})",
                desc.abi_version
            ),
        ));
    }

    let name = unsafe { cstr_to_str(desc.lang_name) }
        .map_or_else(|| id.to_string(), |n| n.into_owned());
    let description = unsafe { cstr_to_str(desc.lang_info) }
        .map(|d| d.into_owned())
        .unwrap_or_default();
    let version = if desc.version.is_null() {
        None
    } else {
        let raw = unsafe { &*desc.version };
        Some(SemVer::from_abi(raw).map_err(|e| invalid(id, format!("declared version: {e}")))?)
    };

    let shared = Rc::new(Shared {
        id: id.to_string(),
        term_cmd: desc.term_cmd,
        cmd_cleanup: desc.cmd_cleanup,
        mirror: RefCell::new(None),
    });

    let mut language = Language::new(name).with_description(description);
    language.version = version;

    let sinvoke = unsafe {
        scan_table(id, "sinvoke", desc.sinvoke_cmds, Pl2SInvokeCmd::is_sentinel)
    }?;
    for raw in sinvoke {
        language.sinvoke.push(SInvokeEntry {
            name: unsafe { entry_name(id, "sinvoke", raw.name) }?,
            stub: raw.stub.map(sinvoke_fn),
            deprecated: raw.deprecated,
            removed: raw.removed,
        });
    }

    let pcall = unsafe { scan_table(id, "pcall", desc.pcall_cmds, Pl2PCallCmd::is_sentinel) }?;
    for raw in pcall {
        language.pcall.push(PCallEntry {
            name: unsafe { entry_name(id, "pcall", raw.name) }?,
            router: raw.router.map(router_fn),
            stub: raw.stub.map(|stub| shared.pcall_fn(stub)),
            deprecated: raw.deprecated,
            removed: raw.removed,
        });
    }

    language.fallback = desc.fallback.map(|stub| shared.pcall_fn(stub));

    let init = desc.init;
    language.init = Some(Box::new(move || {
        let Some(init) = init else {
            return Ok(Box::new(ForeignContext(ptr::null_mut())) as BackendContext);
        };
        let mut err = Pl2Error::default();
        let ctx = init(&mut err);
        match error_from_abi(&err) {
            Some(diag) => Err(diag),
            None => Ok(Box::new(ForeignContext(ctx)) as BackendContext),
        }
    }));

    let at_exit = desc.at_exit;
    let cleanup_shared = Rc::clone(&shared);
    language.at_exit = Some(Box::new(move |mut ctx: BackendContext| {
        if let Some(at_exit) = at_exit {
            at_exit(ForeignContext::from_context(&mut ctx));
        }
        cleanup_shared.cleanup();
    }));

    Ok(language)
}

// ── Easy-load contract ──────────────────────────────────────────────────

/// Build a language from an easy-load backend's name list.
///
/// `resolve` looks up a NUL-terminated `pl2ez_<name>` symbol in the
/// library that exported `entry`.
///
/// # Safety
///
/// `entry` must be the backend's `pl2ezload` function, every stub `resolve`
/// returns must be callable with an argv array, and the library they come
/// from must outlive the returned [`Language`].
pub(crate) unsafe fn load_easy(
    id: &str,
    entry: Pl2EasyLoadEntryPoint,
    resolve: impl Fn(&[u8]) -> Result<Pl2EasyStub, libloading::Error>,
) -> Result<Language, LoadError> {
    let names_ptr = unsafe { entry() };
    if names_ptr.is_null() {
        return Err(invalid(id, "easy-load entry point returned no command list"));
    }
    let names = unsafe { scan_table(id, "easy-load", names_ptr, |p| p.is_null()) }?;
    if names.is_empty() {
        return Err(invalid(id, "easy-load backend declares no commands"));
    }

    let mut language = Language::new(id);
    for name_ptr in names {
        let name = unsafe { entry_name(id, "easy-load", name_ptr) }?;
        if name.len() > MAX_EASY_NAME_LEN {
            return Err(invalid(
                id,
                format!("easy-load command names over {MAX_EASY_NAME_LEN} bytes are not supported"),
            ));
        }
        let symbol = format!("{EASY_STUB_PREFIX}{name}");
        let mut symbol_bytes = symbol.clone().into_bytes();
        symbol_bytes.push(0);
        let stub = resolve(&symbol_bytes).map_err(|source| LoadError::MissingEntryPoint {
            id: id.to_string(),
            symbol,
            source,
        })?;
        language.sinvoke.push(SInvokeEntry {
            name,
            stub: Some(sinvoke_fn(stub)),
            deprecated: false,
            removed: false,
        });
    }
    Ok(language)
}
