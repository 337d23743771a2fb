//! Backend descriptors.
//!
//! A [`Language`] tells the engine which commands a backend understands and
//! how to run them. Three dispatch mechanisms exist:
//!
//! - **simple-invoke**: receives the argument text only and cannot affect
//!   control flow;
//! - **program-call**: receives the program, the backend context, and the
//!   command, and returns where execution continues ([`Next`]);
//! - **fallback**: a program-call handler for commands no table entry matched.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use pl2_diagnostics::Diagnostic;

use crate::grammar::ast::{CommandId, Program};
use crate::semver::SemVer;

/// Opaque per-backend state produced by the init hook.
pub type BackendContext = Box<dyn Any>;

/// Simple-invoke stub. Receives the command name followed by its arguments.
pub type SInvokeFn = Rc<dyn Fn(&[&str])>;

/// Program-call stub, also used as the fallback handler.
pub type PCallFn =
    Rc<dyn Fn(&mut Program, &mut BackendContext, CommandId) -> Result<Next, Diagnostic>>;

/// Router predicate: receives the full command name.
pub type RouterFn = Rc<dyn Fn(&str) -> bool>;

/// Initialization hook producing the backend context.
pub type InitFn = Box<dyn FnOnce() -> Result<BackendContext, Diagnostic>>;

/// At-exit hook consuming the backend context.
pub type AtExitFn = Box<dyn FnOnce(BackendContext)>;

/// Where execution continues after a program-call or fallback stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Continue with the command after the current one.
    Advance,
    /// Continue with the given command.
    Jump(CommandId),
    /// End the run.
    Terminate,
}

/// A simple-invoke table entry.
#[derive(Clone)]
pub struct SInvokeEntry {
    /// Command name matched by exact text.
    pub name: String,
    /// Implementation; `None` declares the command without implementing it.
    pub stub: Option<SInvokeFn>,
    /// Log a warning whenever the entry is used.
    pub deprecated: bool,
    /// Skip the entry during lookup.
    pub removed: bool,
}

impl SInvokeEntry {
    /// An active entry.
    pub fn new(name: impl Into<String>, stub: impl Fn(&[&str]) + 'static) -> Self {
        Self {
            name: name.into(),
            stub: Some(Rc::new(stub)),
            deprecated: false,
            removed: false,
        }
    }

    /// Mark the entry deprecated (builder pattern).
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Mark the entry removed (builder pattern).
    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }
}

impl fmt::Debug for SInvokeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SInvokeEntry")
            .field("name", &self.name)
            .field("has_stub", &self.stub.is_some())
            .field("deprecated", &self.deprecated)
            .field("removed", &self.removed)
            .finish()
    }
}

/// A program-call table entry.
#[derive(Clone)]
pub struct PCallEntry {
    /// Command name matched by exact text.
    pub name: String,
    /// Optional predicate that must also accept the command name.
    pub router: Option<RouterFn>,
    /// Implementation; `None` declares the command without implementing it.
    pub stub: Option<PCallFn>,
    /// Log a warning whenever the entry is used.
    pub deprecated: bool,
    /// Skip the entry during lookup.
    pub removed: bool,
}

impl PCallEntry {
    /// An active entry without a router.
    pub fn new(
        name: impl Into<String>,
        stub: impl Fn(&mut Program, &mut BackendContext, CommandId) -> Result<Next, Diagnostic>
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            router: None,
            stub: Some(Rc::new(stub)),
            deprecated: false,
            removed: false,
        }
    }

    /// An entry that matches by name but has no implementation.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            router: None,
            stub: None,
            deprecated: false,
            removed: false,
        }
    }

    /// Attach a router predicate (builder pattern).
    pub fn with_router(mut self, router: impl Fn(&str) -> bool + 'static) -> Self {
        self.router = Some(Rc::new(router));
        self
    }

    /// Mark the entry deprecated (builder pattern).
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Mark the entry removed (builder pattern).
    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }

    /// Whether this entry applies to a command called `name`.
    pub fn matches(&self, name: &str) -> bool {
        !self.removed
            && self.name == name
            && self.router.as_ref().is_none_or(|router| router(name))
    }
}

impl fmt::Debug for PCallEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PCallEntry")
            .field("name", &self.name)
            .field("has_router", &self.router.is_some())
            .field("has_stub", &self.stub.is_some())
            .field("deprecated", &self.deprecated)
            .field("removed", &self.removed)
            .finish()
    }
}

/// A backend descriptor.
pub struct Language {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Version the backend implements, if it declares one.
    pub version: Option<SemVer>,
    /// Runs once right after loading.
    pub init: Option<InitFn>,
    /// Runs once when the run ends, before the backend is unloaded.
    pub at_exit: Option<AtExitFn>,
    /// Simple-invoke table, scanned in order.
    pub sinvoke: Vec<SInvokeEntry>,
    /// Program-call table, scanned in order.
    pub pcall: Vec<PCallEntry>,
    /// Handler for commands no table entry matched.
    pub fallback: Option<PCallFn>,
}

impl Language {
    /// An empty descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: None,
            init: None,
            at_exit: None,
            sinvoke: Vec::new(),
            pcall: Vec::new(),
            fallback: None,
        }
    }

    /// Set the description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare the implemented version (builder pattern).
    pub fn with_version(mut self, version: SemVer) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the init hook (builder pattern).
    pub fn with_init(
        mut self,
        init: impl FnOnce() -> Result<BackendContext, Diagnostic> + 'static,
    ) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    /// Set the at-exit hook (builder pattern).
    pub fn with_at_exit(mut self, at_exit: impl FnOnce(BackendContext) + 'static) -> Self {
        self.at_exit = Some(Box::new(at_exit));
        self
    }

    /// Append a simple-invoke entry (builder pattern).
    pub fn sinvoke(mut self, entry: SInvokeEntry) -> Self {
        self.sinvoke.push(entry);
        self
    }

    /// Append a program-call entry (builder pattern).
    pub fn pcall(mut self, entry: PCallEntry) -> Self {
        self.pcall.push(entry);
        self
    }

    /// Set the fallback handler (builder pattern).
    pub fn with_fallback(
        mut self,
        fallback: impl Fn(&mut Program, &mut BackendContext, CommandId) -> Result<Next, Diagnostic>
        + 'static,
    ) -> Self {
        self.fallback = Some(Rc::new(fallback));
        self
    }

    /// First non-removed simple-invoke entry named `name`.
    pub fn find_sinvoke(&self, name: &str) -> Option<&SInvokeEntry> {
        self.sinvoke.iter().find(|e| !e.removed && e.name == name)
    }

    /// First program-call entry that applies to `name`.
    pub fn find_pcall(&self, name: &str) -> Option<&PCallEntry> {
        self.pcall.iter().find(|e| e.matches(name))
    }
}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("sinvoke", &self.sinvoke)
            .field("pcall", &self.pcall)
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_pcall(
        _: &mut Program,
        _: &mut BackendContext,
        _: CommandId,
    ) -> Result<Next, Diagnostic> {
        Ok(Next::Advance)
    }

    #[test]
    fn find_sinvoke_skips_removed() {
        let lang = Language::new("t")
            .sinvoke(SInvokeEntry::new("echo", |_| {}).removed())
            .sinvoke(SInvokeEntry::new("echo", |_| {}).deprecated());
        let found = lang.find_sinvoke("echo").unwrap();
        assert!(found.deprecated);
        assert!(lang.find_sinvoke("print").is_none());
    }

    #[test]
    fn router_filters_pcall_entries() {
        let lang = Language::new("t")
            .pcall(PCallEntry::new("goto", noop_pcall).with_router(|_| false))
            .pcall(PCallEntry::empty("goto"));
        let found = lang.find_pcall("goto").unwrap();
        assert!(found.stub.is_none());
    }

    #[test]
    fn router_receives_the_command_name() {
        let entry = PCallEntry::new("if", noop_pcall).with_router(|name| name == "if");
        assert!(entry.matches("if"));
        assert!(!entry.matches("iff"));
        assert!(!entry.clone().removed().matches("if"));
    }

    #[test]
    fn builder_sets_metadata() {
        let lang = Language::new("Echo")
            .with_description("prints things")
            .with_version(SemVer::new(1, 0, 0));
        assert_eq!(lang.name, "Echo");
        assert_eq!(lang.description, "prints things");
        assert_eq!(lang.version, Some(SemVer::new(1, 0, 0)));
        assert!(format!("{lang:?}").contains("Echo"));
    }
}
