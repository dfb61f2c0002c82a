//! Path sandboxing: every client-supplied relative path is joined to the
//! per-user mount root and canonicalized; the canonical form must fall
//! inside the root.

use std::io;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("path escapes sandbox root")]
    Escape,

    #[error("i/o error resolving path: {0}")]
    Io(#[from] io::Error),
}

pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// `root` must already exist and be canonical (callers create the
    /// per-user directory up front; this type only ever narrows).
    pub fn new(root: PathBuf) -> io::Result<Sandbox> {
        let root = root.canonicalize()?;
        Ok(Sandbox { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `relpath` against the sandbox root and rejects any result
    /// that is not the root itself or a path strictly beneath it.
    pub fn resolve(&self, relpath: &str) -> Result<PathBuf, SandboxError> {
        let joined = self.root.join(relpath.trim_start_matches('/'));

        // The target need not exist yet (CREATE/MKDIR); canonicalize what we
        // can and re-attach the non-existent tail.
        let mut canonical = PathBuf::new();
        let mut remainder = Vec::new();
        let mut cursor = joined.as_path();

        loop {
            match cursor.canonicalize() {
                Ok(found) => {
                    canonical = found;
                    break;
                }
                Err(_) => {
                    let Some(parent) = cursor.parent() else {
                        return Err(SandboxError::Escape);
                    };
                    if let Some(name) = cursor.file_name() {
                        remainder.push(name.to_owned());
                    }
                    cursor = parent;
                }
            }
        }

        for component in remainder.into_iter().rev() {
            canonical.push(component);
        }

        self.check_within_root(&canonical)?;
        Ok(canonical)
    }

    fn check_within_root(&self, candidate: &Path) -> Result<(), SandboxError> {
        if candidate == self.root {
            return Ok(());
        }

        if candidate.starts_with(&self.root) {
            Ok(())
        } else {
            Err(SandboxError::Escape)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_path_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let sandbox = Sandbox::new(dir.path().to_path_buf()).unwrap();

        let resolved = sandbox.resolve("sub/file.txt").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().to_path_buf()).unwrap();

        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, SandboxError::Escape));
    }

    #[test]
    fn root_itself_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().to_path_buf()).unwrap();
        let resolved = sandbox.resolve(".").unwrap();
        assert_eq!(resolved, sandbox.root());
    }

    #[test]
    fn rejects_symlink_style_escape_via_dotdot_components() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().to_path_buf()).unwrap();
        let err = sandbox.resolve("sub/../../outside").unwrap_err();
        assert!(matches!(err, SandboxError::Escape));
    }
}
