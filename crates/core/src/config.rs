//! Configuration types for the parser and the extension loader.

use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable naming the root directory searched for backends.
pub const HOME_ENV: &str = "PL2_HOME";

/// Default number of slots in the per-line fragment buffer.
pub const DEFAULT_FRAGMENT_CAPACITY: usize = 512;

/// Parser settings.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// File name recorded in every command's source location.
    pub file_name: Arc<str>,
    /// Slots in the per-line fragment buffer.
    ///
    /// One slot is reserved for the argument terminator handed to native
    /// backends, so a logical line may hold at most `fragment_capacity - 1`
    /// fragments.
    pub fragment_capacity: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            file_name: Arc::from("<unknown-file>"),
            fragment_capacity: DEFAULT_FRAGMENT_CAPACITY,
        }
    }
}

impl ParseConfig {
    /// Default settings with the given file name.
    pub fn for_file(file_name: impl Into<Arc<str>>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Override the fragment capacity (builder pattern).
    pub fn with_fragment_capacity(mut self, capacity: usize) -> Self {
        self.fragment_capacity = capacity;
        self
    }
}

/// Where the native loader looks for backend libraries.
///
/// Candidates are tried in order: the current directory (when enabled),
/// then `home`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Try the current directory first.
    pub search_current_dir: bool,
    /// Directory used as "current"; `None` means the process working directory.
    pub current_dir: Option<PathBuf>,
    /// Root directory searched after the current directory.
    pub home: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_current_dir: true,
            current_dir: None,
            home: None,
        }
    }
}

impl LoaderConfig {
    /// Default settings with `home` taken from [`HOME_ENV`].
    pub fn from_env() -> Self {
        Self {
            home: std::env::var_os(HOME_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Override the home directory (builder pattern).
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Override the current directory (builder pattern).
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Disable or enable the current-directory lookup (builder pattern).
    pub fn search_current_dir(mut self, enabled: bool) -> Self {
        self.search_current_dir = enabled;
        self
    }

    /// Platform file name of the library for backend `id` (`libfoo.so` on Linux).
    pub fn library_file_name(id: &str) -> String {
        format!(
            "{}{}{}",
            std::env::consts::DLL_PREFIX,
            id,
            std::env::consts::DLL_SUFFIX
        )
    }

    /// Candidate library paths for backend `id`, in lookup order.
    pub fn candidates(&self, id: &str) -> Vec<PathBuf> {
        let file = Self::library_file_name(id);
        let mut out = Vec::with_capacity(2);
        if self.search_current_dir {
            out.push(match &self.current_dir {
                Some(dir) => dir.join(&file),
                // A bare relative name would make the dynamic linker search
                // system paths instead of the working directory.
                None => PathBuf::from(".").join(&file),
            });
        }
        if let Some(home) = &self.home {
            out.push(home.join(&file));
        }
        out
    }
}
