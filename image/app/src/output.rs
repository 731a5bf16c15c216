/*++

Licensed under the Apache-2.0 license.

File Name:

   output.rs

Abstract:

    File contains helpers shared by the commands for input and output files.

--*/

use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Output file staged in the destination directory
pub(crate) struct StagedFile {
    file: NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    /// Create a temporary file next to `path`
    pub(crate) fn new(path: &Path) -> anyhow::Result<Self> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create file in {}", dir.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn writer(&mut self) -> &mut std::fs::File {
        self.file.as_file_mut()
    }

    /// Move the file into place
    pub(crate) fn persist(self) -> anyhow::Result<()> {
        let path = self.path;
        self.file
            .persist(&path)
            .with_context(|| format!("Failed to write file {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
        Ok(())
    }
}

/// Stage `data` for `path` without moving it into place
pub(crate) fn stage_file(path: &Path, data: &[u8]) -> anyhow::Result<StagedFile> {
    let mut staged = StagedFile::new(path)?;
    staged
        .writer()
        .write_all(data)
        .with_context(|| format!("Failed to write file {}", path.display()))?;
    Ok(staged)
}

/// Write `data` to `path` through a staged file
pub(crate) fn write_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    stage_file(path, data)?.persist()
}

/// Read a whole input file
pub(crate) fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))
}

/// Split `<file>,<key.pem>` into its parts
pub(crate) fn split_key_suffix(input: &str) -> (PathBuf, Option<PathBuf>) {
    match input.split_once(',') {
        Some((file, key)) if !key.is_empty() => (PathBuf::from(file), Some(PathBuf::from(key))),
        Some((file, _)) => (PathBuf::from(file), None),
        None => (PathBuf::from(input), None),
    }
}
