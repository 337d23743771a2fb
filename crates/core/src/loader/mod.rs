//! Resolving a backend identifier to a [`Language`].
//!
//! The engine talks to loaders through the [`LanguageLoader`] trait.
//! [`NativeLoader`] opens shared libraries; [`Registry`] serves backends
//! implemented in Rust and registered in-process.

pub(crate) mod ffi;
mod native;

pub use native::NativeLoader;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use pl2_diagnostics::{Diagnostic, ErrorCode};

use crate::language::Language;
use crate::semver::SemVer;

/// A backend ready to run, plus the library that must outlive it.
pub struct LoadedLanguage {
    /// The descriptor.
    pub language: Language,
    /// The native library backing the descriptor, if any.
    ///
    /// The descriptor may point into this library, so it must be dropped
    /// first.
    pub library: Option<libloading::Library>,
}

impl LoadedLanguage {
    /// A descriptor with no library behind it.
    pub fn in_process(language: Language) -> Self {
        Self {
            language,
            library: None,
        }
    }
}

impl fmt::Debug for LoadedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedLanguage")
            .field("language", &self.language)
            .field("native", &self.library.is_some())
            .finish()
    }
}

/// One failed attempt to open a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadAttempt {
    /// The path that was tried.
    pub path: PathBuf,
    /// What the dynamic linker reported.
    pub error: String,
}

/// Why a backend could not be loaded.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The identifier is empty or contains path separators.
    #[error("invalid language identifier `{0}`")]
    InvalidIdentifier(String),

    /// No candidate library could be opened.
    #[error("cannot load language library `{id}`: {}", describe_attempts(.attempts))]
    NotFound {
        /// The requested identifier.
        id: String,
        /// Every path tried, in order.
        attempts: Vec<LoadAttempt>,
    },

    /// The library exports neither entry point, or an easy-load stub is missing.
    #[error("cannot locate `{symbol}` in library `{id}`")]
    MissingEntryPoint {
        /// The requested identifier.
        id: String,
        /// The symbol that was looked up.
        symbol: String,
        /// The dynamic linker's error.
        #[source]
        source: libloading::Error,
    },

    /// The library returned a descriptor that breaks the contract.
    #[error("language `{id}` returned an invalid descriptor: {reason}")]
    InvalidDescriptor {
        /// The requested identifier.
        id: String,
        /// What was wrong.
        reason: String,
    },

    /// The backend refused to load or its init hook failed.
    #[error("language `{id}` failed to load: {}", .diagnostic.message)]
    Rejected {
        /// The requested identifier.
        id: String,
        /// The backend's own diagnostic.
        diagnostic: Diagnostic,
    },

    /// No in-process backend is registered under this identifier.
    #[error("unknown language `{0}`")]
    Unknown(String),

    /// The backend's declared version does not satisfy the requirement.
    #[error("language `{id}` provides version {given}, which does not satisfy {required}")]
    VersionMismatch {
        /// The requested identifier.
        id: String,
        /// Version requested by the `language` directive.
        required: SemVer,
        /// Version declared by the backend.
        given: SemVer,
    },
}

fn describe_attempts(attempts: &[LoadAttempt]) -> String {
    if attempts.is_empty() {
        return "no search path configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.path.display(), a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl LoadError {
    /// Convert into a diagnostic.
    ///
    /// Backend rejections keep the backend's own code; everything else is
    /// `LOAD_LANGUAGE_FAILED`.
    pub fn into_diagnostic(self) -> Diagnostic {
        match self {
            LoadError::Rejected { diagnostic, .. } => diagnostic,
            other => {
                let message = format!("language: {other}");
                let diag = Diagnostic::error(ErrorCode::LOAD_LANGUAGE_FAILED, message);
                match other {
                    LoadError::NotFound { attempts, .. } if !attempts.is_empty() => diag
                        .with_context(
                            attempts
                                .into_iter()
                                .enumerate()
                                .map(|(i, a)| {
                                    (format!("candidate_{i}"), a.path.display().to_string())
                                })
                                .collect(),
                        ),
                    _ => diag,
                }
            }
        }
    }
}

impl From<LoadError> for Diagnostic {
    fn from(e: LoadError) -> Self {
        e.into_diagnostic()
    }
}

/// Check an identifier before it is turned into a file name.
pub fn validate_identifier(id: &str) -> Result<(), LoadError> {
    if id.is_empty() || id.contains(['/', '\\', '\0']) || id == "." || id == ".." {
        return Err(LoadError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Fail if the backend declares a version that does not satisfy `required`.
pub fn check_version(id: &str, required: &SemVer, language: &Language) -> Result<(), LoadError> {
    match &language.version {
        Some(given) if !required.is_compatible(given) => Err(LoadError::VersionMismatch {
            id: id.to_string(),
            required: required.clone(),
            given: given.clone(),
        }),
        _ => Ok(()),
    }
}

// ── Loader seam ─────────────────────────────────────────────────────────

/// Something that can turn a backend identifier into a [`Language`].
pub trait LanguageLoader {
    /// Load backend `id`, asking for a version compatible with `required`.
    fn load(&mut self, id: &str, required: &SemVer) -> Result<LoadedLanguage, LoadError>;
}

impl<L: LanguageLoader + ?Sized> LanguageLoader for &mut L {
    fn load(&mut self, id: &str, required: &SemVer) -> Result<LoadedLanguage, LoadError> {
        (**self).load(id, required)
    }
}

impl<L: LanguageLoader + ?Sized> LanguageLoader for Box<L> {
    fn load(&mut self, id: &str, required: &SemVer) -> Result<LoadedLanguage, LoadError> {
        (**self).load(id, required)
    }
}

// ── In-process registry ─────────────────────────────────────────────────

/// Builds a [`Language`] for a requested version.
pub type LanguageFactory = Box<dyn Fn(&SemVer) -> Result<Language, Diagnostic>>;

/// In-process backends addressed by identifier.
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, LanguageFactory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one with the same id.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        factory: impl Fn(&SemVer) -> Result<Language, Diagnostic> + 'static,
    ) -> &mut Self {
        self.factories.insert(id.into(), Box::new(factory));
        self
    }

    /// Register a backend linked into this process that exports the native
    /// entry point, so it runs through the same adapter as a loaded library.
    ///
    /// # Safety
    ///
    /// `entry` must honour the native-extension contract, and every pointer
    /// in the descriptor it returns must stay valid for the process lifetime.
    pub unsafe fn register_native(
        &mut self,
        id: impl Into<String>,
        entry: pl2_abi::Pl2EntryPoint,
    ) -> &mut Self {
        let id = id.into();
        let key = id.clone();
        self.register(key, move |required: &SemVer| {
            unsafe { ffi::load_full(&id, entry, required) }.map_err(LoadError::into_diagnostic)
        })
    }

    /// Register a backend (builder pattern).
    pub fn with(
        mut self,
        id: impl Into<String>,
        factory: impl Fn(&SemVer) -> Result<Language, Diagnostic> + 'static,
    ) -> Self {
        self.register(id, factory);
        self
    }

    /// Whether a backend is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("ids", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LanguageLoader for Registry {
    fn load(&mut self, id: &str, required: &SemVer) -> Result<LoadedLanguage, LoadError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| LoadError::Unknown(id.to_string()))?;
        let language = factory(required).map_err(|diagnostic| LoadError::Rejected {
            id: id.to_string(),
            diagnostic,
        })?;
        tracing::debug!(id, language = %language.name, "loaded in-process language");
        Ok(LoadedLanguage::in_process(language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_with_separators_are_rejected() {
        for id in ["", "a/b", "..", "a\\b", "nul\0"] {
            assert!(
                matches!(validate_identifier(id), Err(LoadError::InvalidIdentifier(_))),
                "{id:?} should be rejected"
            );
        }
        assert!(validate_identifier("basic-2").is_ok());
    }

    #[test]
    fn not_found_lists_attempts() {
        let err = LoadError::NotFound {
            id: "foo".into(),
            attempts: vec![LoadAttempt {
                path: PathBuf::from("./libfoo.so"),
                error: "no such file".into(),
            }],
        };
        let diag = err.into_diagnostic();
        assert_eq!(diag.code, ErrorCode::LOAD_LANGUAGE_FAILED);
        assert!(diag.message.contains("./libfoo.so: no such file"), "{}", diag.message);
        assert_eq!(diag.context.unwrap()["candidate_0"], "./libfoo.so");
    }

    #[test]
    fn rejection_keeps_backend_code() {
        let err = LoadError::Rejected {
            id: "x".into(),
            diagnostic: Diagnostic::error(ErrorCode(120), "unsupported version"),
        };
        assert_eq!(err.into_diagnostic().code, ErrorCode(120));
    }

    #[test]
    fn version_check_uses_compatibility() {
        let lang = Language::new("t").with_version(SemVer::new(1, 4, 0));
        assert!(check_version("t", &SemVer::new(1, 2, 0), &lang).is_ok());
        assert!(matches!(
            check_version("t", &SemVer::new(2, 0, 0), &lang),
            Err(LoadError::VersionMismatch { .. })
        ));
        assert!(check_version("t", &SemVer::new(9, 9, 9), &Language::new("u")).is_ok());
    }

    #[test]
    fn registry_loads_registered_factories() {
        let mut registry = Registry::new().with("echo", |_| Ok(Language::new("Echo")));
        assert!(registry.contains("echo"));
        assert_eq!(registry.ids().collect::<Vec<_>>(), ["echo"]);
        let loaded = registry.load("echo", &SemVer::new(1, 0, 0)).unwrap();
        assert_eq!(loaded.language.name, "Echo");
        assert!(loaded.library.is_none());
        assert!(matches!(
            registry.load("nope", &SemVer::zero()),
            Err(LoadError::Unknown(_))
        ));
    }

    #[test]
    fn registry_factory_errors_are_rejections() {
        let mut registry = Registry::new().with("strict", |v: &SemVer| {
            if v.major == 1 {
                Ok(Language::new("Strict"))
            } else {
                Err(Diagnostic::error(ErrorCode::LOAD_LANGUAGE_FAILED, "only 1.x"))
            }
        });
        let err = registry.load("strict", &SemVer::new(2, 0, 0)).unwrap_err();
        assert!(matches!(err, LoadError::Rejected { .. }));
        assert!(err.to_string().contains("only 1.x"));
    }
}
