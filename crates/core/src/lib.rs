//! pl2 core library.
//!
//! Parses line-oriented pl2 programs and runs them against dynamically
//! loaded language backends. The main entry points are [`parse_str`] for
//! parsing and [`Engine`] for execution; [`NativeLoader`] resolves
//! `language` directives to shared libraries.

#![warn(missing_docs)]

/// Parser and loader settings.
pub mod config;
/// The dispatch engine.
pub mod engine;
/// pl2 grammar: cursor, lexer, parser, program model, and dumps.
pub mod grammar;
/// Backend descriptors.
pub mod language;
/// Resolving backend identifiers to descriptors.
pub mod loader;
/// Semantic versions.
pub mod semver;

// ── Convenience re-exports ──────────────────────────────────────────────────
// Flat imports for the most common entry points. The full module paths
// remain available for less common types.

// Parser
pub use grammar::parser::{parse_str, parse_with_config};

// Program model
pub use grammar::ast::{CmdPart, Command, CommandId, Program};

// Configuration
pub use config::{LoaderConfig, ParseConfig};

// Versions
pub use semver::{SemVer, SemVerError};

// Backends
pub use language::{BackendContext, Language, Next, PCallEntry, SInvokeEntry};

// Loaders
pub use loader::{LanguageLoader, LoadError, LoadedLanguage, NativeLoader, Registry};

// Engine
pub use engine::{Engine, EngineState, StepOutcome, run_source};

// Diagnostics (re-exported from the diagnostics crate)
pub use pl2_diagnostics::{Diagnostic, ErrorCode, Severity, SourceInfo, Span, codes};

// Serialization helpers
pub use grammar::dump::{to_pretty_json, to_text};
