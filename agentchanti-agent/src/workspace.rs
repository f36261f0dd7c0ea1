//! On-disk workspace the artifact is materialised into before testing
//!
//! The workspace remembers which files it wrote in a small manifest, so a
//! later version (or a later run into the same directory) can drop the files
//! that no longer belong to the artifact. Files it did not write are never
//! touched.

use crate::artifact::CodeArtifact;
use agentchanti_llm::{Error, Result};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Lists the files written by the last [`Workspace::sync_files`], one per line
pub const MANIFEST_FILE: &str = ".agentchanti_files";

/// A directory that generated files are written into
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied relative path inside the workspace.
    ///
    /// Absolute paths and `..` components are refused.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(Error::invalid_argument("empty file path")
                .with_operation("workspace::resolve"));
        }

        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::invalid_argument(format!(
                        "path escapes the workspace: {}",
                        relative
                    ))
                    .with_operation("workspace::resolve")
                    .with_context("path", relative));
                }
            }
        }
        Ok(resolved)
    }

    /// Write every file of `files`, creating parent directories as needed.
    /// Returns the written paths in name order.
    pub async fn write_files<'a, I>(&self, files: I) -> Result<Vec<PathBuf>>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::from(e).with_operation("workspace::write_files"))?;

        let mut written = Vec::new();
        for (name, content) in files {
            let path = self.resolve(name)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| {
                        Error::from(e)
                            .with_operation("workspace::write_files")
                            .with_context("path", parent.display().to_string())
                    })?;
            }
            tokio::fs::write(&path, content).await.map_err(|e| {
                Error::from(e)
                    .with_operation("workspace::write_files")
                    .with_context("path", path.display().to_string())
            })?;
            debug!(path = %path.display(), bytes = content.len(), "wrote file");
            written.push(path);
        }
        Ok(written)
    }

    /// Write the artifact's files
    pub async fn write_artifact(&self, artifact: &CodeArtifact) -> Result<Vec<PathBuf>> {
        self.write_files(artifact.files()).await
    }

    /// Make `files` the complete set of managed files in the workspace.
    ///
    /// Files recorded by the previous sync that are not in `files` are
    /// deleted, then `files` is written and recorded.
    pub async fn sync_files(&self, files: &BTreeMap<String, String>) -> Result<Vec<PathBuf>> {
        for stale in self.managed_files().await? {
            if files.contains_key(&stale) {
                continue;
            }
            let path = match self.resolve(&stale) {
                Ok(path) => path,
                Err(err) => {
                    warn!(file = %stale, error = %err, "ignoring bad manifest entry");
                    continue;
                }
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed stale file"),
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::from(e)
                        .with_operation("workspace::sync_files")
                        .with_context("path", path.display().to_string()))
                }
            }
        }

        let written = self.write_files(files).await?;

        let manifest = files.keys().map(String::as_str).collect::<Vec<_>>().join("\n");
        tokio::fs::write(self.root.join(MANIFEST_FILE), manifest)
            .await
            .map_err(|e| Error::from(e).with_operation("workspace::sync_files"))?;
        Ok(written)
    }

    /// Files recorded by the last sync; empty for a fresh directory
    pub async fn managed_files(&self) -> Result<Vec<String>> {
        match tokio::fs::read_to_string(self.root.join(MANIFEST_FILE)).await {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::from(e).with_operation("workspace::managed_files")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchanti_llm::ErrorKind;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_rejects_escape() {
        let ws = Workspace::new("/tmp/ws");
        assert_eq!(ws.resolve("src/app.py").unwrap(), PathBuf::from("/tmp/ws/src/app.py"));
        assert_eq!(ws.resolve("./app.py").unwrap(), PathBuf::from("/tmp/ws/app.py"));

        for bad in ["../etc/passwd", "src/../../x.py", "/etc/passwd", ""] {
            let err = ws.resolve(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_write_artifact_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("out"));

        let mut files = BTreeMap::new();
        files.insert("calc.py".to_string(), "def add(a, b):\n    return a + b\n".to_string());
        files.insert("tests/test_calc.py".to_string(), "from calc import add\n".to_string());
        let artifact = CodeArtifact::new(1, files);

        let written = ws.write_artifact(&artifact).await.unwrap();
        assert_eq!(written.len(), 2);

        let content = std::fs::read_to_string(dir.path().join("out/tests/test_calc.py")).unwrap();
        assert_eq!(content, "from calc import add\n");
    }

    fn file_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_sync_removes_files_of_the_previous_version() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        std::fs::write(dir.path().join("notes.txt"), "mine").unwrap();

        ws.sync_files(&file_map(&[("calc.py", "v1"), ("tests/test_broken.py", "boom")]))
            .await
            .unwrap();
        assert!(dir.path().join("tests/test_broken.py").exists());

        ws.sync_files(&file_map(&[("calc.py", "v2"), ("test_calc.py", "ok")]))
            .await
            .unwrap();

        assert!(!dir.path().join("tests/test_broken.py").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("calc.py")).unwrap(), "v2");
        assert!(dir.path().join("test_calc.py").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "mine");
        assert_eq!(ws.managed_files().await.unwrap(), vec!["calc.py", "test_calc.py"]);
    }

    #[tokio::test]
    async fn test_sync_survives_a_new_workspace_handle() {
        let dir = TempDir::new().unwrap();
        Workspace::new(dir.path())
            .sync_files(&file_map(&[("old.py", "x")]))
            .await
            .unwrap();

        Workspace::new(dir.path())
            .sync_files(&file_map(&[("new.py", "y")]))
            .await
            .unwrap();

        assert!(!dir.path().join("old.py").exists());
        assert!(dir.path().join("new.py").exists());
    }

    #[tokio::test]
    async fn test_sync_skips_escaping_manifest_entries() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("out"));
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("keep.py"), "outside").unwrap();
        std::fs::write(dir.path().join("out").join(MANIFEST_FILE), "../keep.py\n").unwrap();

        ws.sync_files(&file_map(&[("a.py", "a")])).await.unwrap();
        assert!(dir.path().join("keep.py").exists());
    }

    #[tokio::test]
    async fn test_write_refuses_traversal() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        let artifact = CodeArtifact::single(1, "../evil.py", "import os");
        let err = ws.write_artifact(&artifact).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!dir.path().parent().unwrap().join("evil.py").exists());
    }
}
