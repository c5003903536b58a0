/// Well-known file locations inside the watched work tree.
///
///   - .reloader.toml  Optional per-repository settings, read once at startup.
///   - .git/           Never watched for filesystem nudges; git rewrites it on every status.
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".reloader.toml";
pub const GIT_DIR_NAME: &str = ".git";

/// Returns the default config file path: <repo root>/.reloader.toml
pub fn config_file_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_FILE_NAME)
}

/// True if `path` lies inside the repository's `.git` directory.
pub fn is_git_internal(repo_root: &Path, path: &Path) -> bool {
    path.starts_with(repo_root.join(GIT_DIR_NAME))
}
