use std::path::Path;

use libloading::Library;
use pl2_abi::{
    EASY_LOAD_ENTRY_POINT, ENTRY_POINT, Pl2EasyLoadEntryPoint, Pl2EasyStub, Pl2EntryPoint,
};

use super::{LanguageLoader, LoadAttempt, LoadError, LoadedLanguage, ffi, validate_identifier};
use crate::config::LoaderConfig;
use crate::semver::SemVer;

/// Loads backends from shared libraries.
///
/// Libraries are looked up by [`LoaderConfig::candidates`]; the first one
/// that opens wins. A library exporting `pl2ext_loadLanguage` is loaded
/// through the full contract, otherwise `pl2ezload` is tried.
#[derive(Debug, Clone)]
pub struct NativeLoader {
    config: LoaderConfig,
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NativeLoader {
    /// A loader with explicit settings.
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// A loader configured from the environment.
    pub fn from_env() -> Self {
        Self::new(LoaderConfig::from_env())
    }

    /// The active settings.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn open(&self, id: &str) -> Result<Library, LoadError> {
        let mut attempts = Vec::new();
        for path in self.config.candidates(id) {
            tracing::debug!(id, path = %path.display(), "trying language library");
            match open_library(&path) {
                Ok(library) => {
                    tracing::debug!(id, path = %path.display(), "opened language library");
                    return Ok(library);
                }
                Err(e) => attempts.push(LoadAttempt {
                    path,
                    error: e.to_string(),
                }),
            }
        }
        Err(LoadError::NotFound {
            id: id.to_string(),
            attempts,
        })
    }
}

fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    // Loading runs the library's initializers; backends are trusted code
    // chosen by the program author.
    unsafe { Library::new(path) }
}

impl LanguageLoader for NativeLoader {
    fn load(&mut self, id: &str, required: &SemVer) -> Result<LoadedLanguage, LoadError> {
        validate_identifier(id)?;
        let library = self.open(id)?;

        let full = unsafe { library.get::<Pl2EntryPoint>(ENTRY_POINT) }.map(|s| *s);
        let language = match full {
            // The descriptor and its stubs stay valid while `library` is
            // loaded, and `LoadedLanguage` keeps the two together.
            Ok(entry) => unsafe { ffi::load_full(id, entry, required) }?,
            Err(full_err) => {
                let easy =
                    unsafe { library.get::<Pl2EasyLoadEntryPoint>(EASY_LOAD_ENTRY_POINT) }
                        .map(|s| *s);
                match easy {
                    Ok(entry) => unsafe {
                        ffi::load_easy(id, entry, |symbol| {
                            library.get::<Pl2EasyStub>(symbol).map(|s| *s)
                        })
                    }?,
                    Err(_) => {
                        return Err(LoadError::MissingEntryPoint {
                            id: id.to_string(),
                            symbol: symbol_name(ENTRY_POINT),
                            source: full_err,
                        });
                    }
                }
            }
        };

        tracing::debug!(id, language = %language.name, "loaded native language");
        Ok(LoadedLanguage {
            language,
            library: Some(library),
        })
    }
}

fn symbol_name(symbol: &[u8]) -> String {
    String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned()
}
