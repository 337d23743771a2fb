//! The dispatch engine.
//!
//! An [`Engine`] walks a [`Program`] one command at a time. Two names are
//! reserved: `language <id> <version>` loads the backend (once per run) and
//! `abort` stops the run. Every other command is resolved against the loaded
//! [`Language`]: first the command's resolve cache, then the simple-invoke
//! table, then the program-call table, then the fallback handler.
//!
//! When the run halts, the backend's at-exit hook runs with its context,
//! then the descriptor is dropped, then its library is unloaded.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use pl2_diagnostics::{Diagnostic, ErrorCode};

use crate::grammar::ast::{CommandId, Program, Resolution};
use crate::language::{BackendContext, Language, Next, PCallFn, SInvokeFn};
use crate::loader::{LanguageLoader, LoadError, check_version};
use crate::semver::SemVer;

/// Name of the directive that loads a backend.
pub const LANGUAGE_DIRECTIVE: &str = "language";

/// Name of the directive that stops the run.
pub const ABORT_DIRECTIVE: &str = "abort";

/// Lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No backend loaded yet.
    Idle,
    /// A backend is loaded and commands remain.
    Running,
    /// The run is over; the backend (if any) has been torn down.
    Halted,
}

/// Result of a successful [`Engine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More commands may run.
    Continue,
    /// The run is over.
    Halted,
}

/// How a command will be executed.
enum Dispatch {
    NoLanguage,
    Cached(Option<PCallFn>),
    SInvoke {
        stub: Option<SInvokeFn>,
        deprecated: bool,
    },
    PCall {
        stub: Option<PCallFn>,
        deprecated: bool,
    },
    Fallback(PCallFn),
    Unknown,
}

/// The loaded backend and everything that must be released with it.
struct Backend {
    id: String,
    language: Language,
    context: BackendContext,
    library: Option<libloading::Library>,
}

/// Runs a program against a dynamically loaded backend.
pub struct Engine<'p, L: LanguageLoader> {
    program: &'p mut Program,
    loader: L,
    cursor: Option<CommandId>,
    state: EngineState,
    backend: Option<Backend>,
    warnings: Vec<Diagnostic>,
    warned: HashSet<(ErrorCode, CommandId)>,
}

impl<'p, L: LanguageLoader> Engine<'p, L> {
    /// An idle engine positioned on the program's first command.
    pub fn new(program: &'p mut Program, loader: L) -> Self {
        let cursor = program.first();
        Self {
            program,
            loader,
            cursor,
            state: EngineState::Idle,
            backend: None,
            warnings: Vec::new(),
            warned: HashSet::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The command the next step will execute.
    pub fn cursor(&self) -> Option<CommandId> {
        self.cursor
    }

    /// The program being run.
    pub fn program(&self) -> &Program {
        self.program
    }

    /// The loaded backend, if any.
    pub fn language(&self) -> Option<&Language> {
        self.backend.as_ref().map(|b| &b.language)
    }

    /// Mutable access to the loaded backend's tables.
    ///
    /// Commands that already resolved to a program-call entry keep using it.
    pub fn language_mut(&mut self) -> Option<&mut Language> {
        self.backend.as_mut().map(|b| &mut b.language)
    }

    /// Warnings collected so far.
    ///
    /// Each command reports a given warning code at most once per run, so
    /// loops do not repeat it.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Drain the collected warnings.
    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    /// Run until the program halts or a step fails.
    ///
    /// The backend is torn down either way.
    pub fn run(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Halted) => return Ok(()),
                Err(diag) => {
                    self.halt();
                    return Err(diag);
                }
            }
        }
    }

    /// Stop the run and tear down the backend. Idempotent.
    pub fn finish(&mut self) {
        self.halt();
    }

    /// Execute one command.
    ///
    /// A failed step leaves the state and cursor where they were, so the host
    /// decides whether to stop; [`Engine::run`] always stops.
    pub fn step(&mut self) -> Result<StepOutcome, Diagnostic> {
        if self.state == EngineState::Halted {
            return Ok(StepOutcome::Halted);
        }
        let Some(id) = self.cursor else {
            self.halt();
            return Ok(StepOutcome::Halted);
        };
        let Some(cmd) = self.program.get(id) else {
            self.halt();
            return Ok(StepOutcome::Halted);
        };
        let name = cmd.name().text.clone();

        match name.as_str() {
            LANGUAGE_DIRECTIVE => {
                self.load_language(id)
                    .map_err(|diag| self.locate(id, diag))?;
                self.state = EngineState::Running;
                return Ok(self.advance(id));
            }
            ABORT_DIRECTIVE => {
                tracing::debug!(line = self.line(id), "abort");
                self.halt();
                return Ok(StepOutcome::Halted);
            }
            _ => {}
        }

        match self.resolve(id, &name) {
            Dispatch::NoLanguage => {
                self.warn(
                    id,
                    ErrorCode::NO_LANGUAGE_LOADED,
                    format!("no language loaded to execute `{name}`"),
                );
                Ok(self.advance(id))
            }
            Dispatch::Cached(Some(stub)) | Dispatch::Fallback(stub) => self.invoke(&stub, id),
            Dispatch::Cached(None) => Ok(self.advance(id)),
            Dispatch::SInvoke { stub, deprecated } => {
                if deprecated {
                    self.warn_deprecated(id, &name);
                }
                match stub {
                    Some(stub) => stub(&cmd_argv(&*self.program, id)),
                    None => self.warn_empty(id, &name),
                }
                Ok(self.advance(id))
            }
            Dispatch::PCall { stub, deprecated } => {
                if deprecated {
                    self.warn_deprecated(id, &name);
                }
                if let Some(cmd) = self.program.get_mut(id) {
                    cmd.resolve = Resolution::Bound(stub.clone());
                }
                match stub {
                    Some(stub) => self.invoke(&stub, id),
                    None => {
                        self.warn_empty(id, &name);
                        Ok(self.advance(id))
                    }
                }
            }
            Dispatch::Unknown => {
                let diag = Diagnostic::error(
                    ErrorCode::UNKNOWN_COMMAND,
                    format!(
                        "`{name}` is not recognized as an internal or external command, \
                         operable program or batch file"
                    ),
                );
                Err(self.locate(id, diag))
            }
        }
    }

    /// Decide how command `id` runs: resolve cache, then simple-invoke,
    /// then program-call, then fallback.
    fn resolve(&self, id: CommandId, name: &str) -> Dispatch {
        let Some(backend) = &self.backend else {
            return Dispatch::NoLanguage;
        };
        if let Some(cmd) = self.program.get(id)
            && let Resolution::Bound(stub) = &cmd.resolve
        {
            return Dispatch::Cached(stub.clone());
        }
        let language = &backend.language;
        if let Some(entry) = language.find_sinvoke(name) {
            return Dispatch::SInvoke {
                stub: entry.stub.clone(),
                deprecated: entry.deprecated,
            };
        }
        if let Some(entry) = language.find_pcall(name) {
            return Dispatch::PCall {
                stub: entry.stub.clone(),
                deprecated: entry.deprecated,
            };
        }
        match &language.fallback {
            Some(fallback) => Dispatch::Fallback(Rc::clone(fallback)),
            None => Dispatch::Unknown,
        }
    }

    // ── Directive handling ──────────────────────────────────────────────

    fn load_language(&mut self, id: CommandId) -> Result<(), Diagnostic> {
        if let Some(backend) = &self.backend {
            return Err(Diagnostic::error(
                ErrorCode::LOAD_LANGUAGE_FAILED,
                format!("language: another language (`{}`) already loaded", backend.id),
            ));
        }
        let Some(cmd) = self.program.get(id) else {
            return Err(Diagnostic::error(ErrorCode::GENERAL, "command vanished"));
        };
        let [lang_id, version] = cmd.args() else {
            return Err(Diagnostic::error(
                ErrorCode::LOAD_LANGUAGE_FAILED,
                format!("language: expected 2 arguments, got {}", cmd.args().len()),
            ));
        };
        let lang_id = lang_id.text.clone();
        let required = SemVer::parse(version.as_str()).map_err(|e| {
            Diagnostic::error(ErrorCode::SEMVER_PARSE, format!("language: {e}"))
        })?;

        let loaded = self.loader.load(&lang_id, &required)?;
        let mut language = loaded.language;
        let library = loaded.library;

        if let Err(e) = check_version(&lang_id, &required, &language) {
            release(&lang_id, language, library);
            return Err(e.into_diagnostic());
        }

        let context = match language.init.take() {
            Some(init) => match init() {
                Ok(context) => context,
                Err(diagnostic) => {
                    release(&lang_id, language, library);
                    return Err(LoadError::Rejected {
                        id: lang_id,
                        diagnostic,
                    }
                    .into_diagnostic());
                }
            },
            None => Box::new(()),
        };

        tracing::debug!(
            id = %lang_id,
            name = %language.name,
            required = %required,
            "language initialized"
        );
        self.backend = Some(Backend {
            id: lang_id,
            language,
            context,
            library,
        });
        Ok(())
    }

    // ── Control flow ────────────────────────────────────────────────────

    fn invoke(&mut self, stub: &PCallFn, id: CommandId) -> Result<StepOutcome, Diagnostic> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(self.advance(id));
        };
        let next = stub(&mut *self.program, &mut backend.context, id)
            .map_err(|d| self.locate(id, d))?;
        match next {
            Next::Advance => Ok(self.advance(id)),
            Next::Jump(target) if self.program.contains(target) => {
                self.cursor = Some(target);
                Ok(StepOutcome::Continue)
            }
            Next::Jump(target) => {
                let diag = Diagnostic::error(
                    ErrorCode::INVALID_REDIRECT,
                    format!(
                        "redirect to command {target} outside a program of {} commands",
                        self.program.len()
                    ),
                );
                Err(self.locate(id, diag))
            }
            Next::Terminate => {
                tracing::debug!(line = self.line(id), "terminated by backend");
                self.halt();
                Ok(StepOutcome::Halted)
            }
        }
    }

    fn advance(&mut self, id: CommandId) -> StepOutcome {
        self.cursor = self.program.next(id);
        if self.cursor.is_none() {
            self.halt();
            return StepOutcome::Halted;
        }
        StepOutcome::Continue
    }

    fn halt(&mut self) {
        self.state = EngineState::Halted;
        self.cursor = None;
        self.teardown();
    }

    /// Run at-exit, drop per-command backend data, drop the descriptor,
    /// then unload the library.
    fn teardown(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        let Backend {
            id,
            mut language,
            context,
            library,
        } = backend;
        if let Some(at_exit) = language.at_exit.take() {
            tracing::debug!(id = %id, "running at-exit hook");
            at_exit(context);
        } else {
            drop(context);
        }
        self.program.clear_runtime_state();
        release(&id, language, library);
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    fn line(&self, id: CommandId) -> u32 {
        self.program.get(id).map_or(0, |c| c.line())
    }

    fn locate(&self, id: CommandId, diag: Diagnostic) -> Diagnostic {
        match (&diag.source, self.program.get(id)) {
            (None, Some(cmd)) => {
                let span = cmd.span();
                let diag = diag.at(cmd.source().clone());
                if diag.span.is_none() {
                    diag.with_span(span)
                } else {
                    diag
                }
            }
            _ => diag,
        }
    }

    fn warn(&mut self, id: CommandId, code: ErrorCode, message: String) {
        if !self.warned.insert((code, id)) {
            return;
        }
        let diag = self.locate(id, Diagnostic::warn(code, message));
        tracing::warn!(code = %diag.code, line = diag.line(), "{}", diag.message);
        self.warnings.push(diag);
    }

    fn warn_deprecated(&mut self, id: CommandId, name: &str) {
        self.warn(
            id,
            ErrorCode::DEPRECATED_COMMAND,
            format!("using deprecated command: {name}"),
        );
    }

    fn warn_empty(&mut self, id: CommandId, name: &str) {
        self.warn(
            id,
            ErrorCode::EMPTY_ENTRY,
            format!("entry for command {name} exists but has no implementation"),
        );
    }
}

impl<L: LanguageLoader> Drop for Engine<'_, L> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<L: LanguageLoader> fmt::Debug for Engine<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("language", &self.backend.as_ref().map(|b| &b.id))
            .field("warnings", &self.warnings.len())
            .finish_non_exhaustive()
    }
}

/// argv-style text for a simple-invoke stub: the name, then each argument.
fn cmd_argv(program: &Program, id: CommandId) -> Vec<&str> {
    program.get(id).map(|c| c.argv()).unwrap_or_default()
}

/// Drop a descriptor, then unload the library behind it.
fn release(id: &str, language: Language, library: Option<libloading::Library>) {
    drop(language);
    if let Some(library) = library {
        match library.close() {
            Ok(()) => tracing::debug!(id, "unloaded language library"),
            Err(e) => tracing::warn!(id, error = %e, "error unloading language library"),
        }
    }
}

/// Parse `input` with default settings and run it with `loader`.
///
/// Returns the warnings collected during the run.
pub fn run_source<L: LanguageLoader>(input: &str, loader: L) -> Result<Vec<Diagnostic>, Diagnostic> {
    let mut program = crate::grammar::parser::parse_str(input)?;
    let mut engine = Engine::new(&mut program, loader);
    engine.run()?;
    Ok(engine.take_warnings())
}
