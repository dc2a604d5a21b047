//! Locating ship and stage scripts
//!
//! A script is either a single `.lua` file or a package directory holding a
//! `main.lua`. Names are always relative to a base directory and may not
//! escape it.

use std::path::{Component, Path, PathBuf};

use crate::error::LoadError;

/// Entry point looked up inside a package directory
pub const PACKAGE_ENTRY: &str = "main.lua";
pub const SCRIPT_EXTENSION: &str = "lua";

/// A resolved script, ready to hand to a sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSource {
    /// Script file to execute
    pub path: PathBuf,
    /// Directory the script lives in; stage-ship paths resolve against it
    pub dir: PathBuf,
    /// Default display name (file stem or package directory name)
    pub name: String,
    pub code: String,
}

/// Resolves relative script names under a base directory
pub trait Loader {
    fn load(&self, base: &Path, name: &str) -> Result<ScriptSource, LoadError>;
}

/// Loads scripts from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl FsLoader {
    /// Path and directory for `name` under `base`, without reading it
    pub fn resolve(&self, base: &Path, name: &str) -> Result<(PathBuf, PathBuf), LoadError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(LoadError::UnsafePath(name.to_string()));
        }

        let candidate = base.join(relative);
        if !candidate.exists() {
            return Err(LoadError::NotFound(candidate));
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| LoadError::Io { path, source }
        };
        let canonical_base = base.canonicalize().map_err(io_err(base))?;
        let canonical = candidate.canonicalize().map_err(io_err(&candidate))?;
        if !canonical.starts_with(&canonical_base) {
            return Err(LoadError::UnsafePath(name.to_string()));
        }

        if canonical.is_dir() {
            let entry = canonical.join(PACKAGE_ENTRY);
            if !entry.is_file() {
                return Err(LoadError::InvalidPackage {
                    path: canonical,
                    reason: format!("missing {PACKAGE_ENTRY}"),
                });
            }
            return Ok((entry, canonical));
        }
        if canonical.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            return Err(LoadError::InvalidPackage {
                path: canonical,
                reason: "not a .lua script or package directory".into(),
            });
        }
        let dir = canonical.parent().map(Path::to_path_buf).unwrap_or(canonical_base);
        Ok((canonical, dir))
    }
}

impl Loader for FsLoader {
    fn load(&self, base: &Path, name: &str) -> Result<ScriptSource, LoadError> {
        let (path, dir) = self.resolve(base, name)?;
        let code = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let display = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
            .to_string();
        log::debug!("loaded {} from {}", display, path.display());
        Ok(ScriptSource {
            path,
            dir,
            name: display,
            code,
        })
    }
}

/// Strip the base directory from `dir`, for resolving nested names
pub fn relative_dir(base: &Path, dir: &Path) -> PathBuf {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    dir.strip_prefix(&canonical_base).map(Path::to_path_buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sitter.lua"), "function run() end").unwrap();
        fs::create_dir(dir.path().join("pack")).unwrap();
        fs::write(dir.path().join("pack").join("main.lua"), "-- pack").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        dir
    }

    #[test]
    fn test_loads_single_file() {
        let dir = tree();
        let src = FsLoader.load(dir.path(), "sitter.lua").unwrap();
        assert_eq!(src.name, "sitter");
        assert_eq!(src.code, "function run() end");
        assert_eq!(src.dir, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_loads_package_directory() {
        let dir = tree();
        let src = FsLoader.load(dir.path(), "pack").unwrap();
        assert_eq!(src.name, "pack");
        assert!(src.path.ends_with("pack/main.lua"));
        assert_eq!(relative_dir(dir.path(), &src.dir), PathBuf::from("pack"));
    }

    #[test]
    fn test_missing_script() {
        let dir = tree();
        assert!(matches!(FsLoader.load(dir.path(), "nobody.lua"), Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_invalid_packages() {
        let dir = tree();
        assert!(matches!(
            FsLoader.load(dir.path(), "empty"),
            Err(LoadError::InvalidPackage { .. })
        ));
        assert!(matches!(
            FsLoader.load(dir.path(), "notes.txt"),
            Err(LoadError::InvalidPackage { .. })
        ));
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        let dir = tree();
        assert!(matches!(
            FsLoader.load(dir.path(), "../sitter.lua"),
            Err(LoadError::UnsafePath(_))
        ));
        assert!(matches!(FsLoader.load(dir.path(), "/etc/passwd"), Err(LoadError::UnsafePath(_))));
        assert!(matches!(FsLoader.load(dir.path(), ""), Err(LoadError::UnsafePath(_))));
    }
}
