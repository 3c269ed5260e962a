//! Resolves named kernel programs (`"grid"`, `"perlin"`, `"waves"`) to WGSL files.

use std::path::{Path, PathBuf};

/// Environment variable naming an extra kernel directory
pub const KERNEL_DIR_ENV: &str = "TIDEGRID_KERNEL_DIR";

/// Kernel sources shipped with the crate
pub const BUNDLED_KERNEL_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/resources/kernels");

const KERNEL_EXTENSION: &str = "wgsl";

/// Ordered list of directories searched for kernel sources
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    search_dirs: Vec<PathBuf>,
}

impl Default for ResourceLocator {
    /// `$TIDEGRID_KERNEL_DIR` (if set), then the bundled kernels
    fn default() -> Self {
        Self::with_dirs(Vec::new())
    }
}

impl ResourceLocator {
    /// Explicit directories first, then the environment override, then the bundled kernels.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        let mut search_dirs = dirs;
        if let Some(dir) = std::env::var_os(KERNEL_DIR_ENV) {
            search_dirs.push(PathBuf::from(dir));
        }
        search_dirs.push(PathBuf::from(BUNDLED_KERNEL_DIR));
        Self { search_dirs }
    }

    /// Only the given directories, no fallbacks
    pub fn only(dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs: dirs }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Path of program `name`, or `None` when no search directory has it.
    ///
    /// A name that already carries an extension is looked up as is.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = if Path::new(name).extension().is_some() {
            name.to_string()
        } else {
            format!("{name}.{KERNEL_EXTENSION}")
        };

        self.search_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_kernels_resolve() {
        let locator = ResourceLocator::default();
        for name in ["grid", "perlin", "waves"] {
            let path = locator.locate(name);
            assert!(path.is_some(), "missing bundled kernel {name}");
        }
    }

    #[test]
    fn test_missing_program() {
        let locator = ResourceLocator::default();
        assert!(locator.locate("skybox").is_none());
    }

    #[test]
    fn test_explicit_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("grid.wgsl");
        std::fs::write(&custom, "// custom").unwrap();

        let locator = ResourceLocator::with_dirs(vec![dir.path().to_path_buf()]);
        assert_eq!(locator.locate("grid"), Some(custom));
    }

    #[test]
    fn test_only_has_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ResourceLocator::only(vec![dir.path().to_path_buf()]);
        assert!(locator.locate("grid").is_none());
        assert_eq!(locator.search_dirs().len(), 1);
    }
}
