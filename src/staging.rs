use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use crate::{
    error::{BrokerError, Result},
    ids::RequestId,
};

/// Relocates host-stored uploads into request-scoped paths under the
/// services cache.
///
/// `upload_root` is where the host layer writes inbound files and is the
/// containment root every source path is checked against. `cache_root` is
/// where staged copies and backend artifacts live.
#[derive(Debug, Clone)]
pub struct UploadStaging {
    upload_root: PathBuf,
    cache_root: PathBuf,
}

impl UploadStaging {
    pub fn new(upload_root: impl AsRef<Path>, cache_root: impl AsRef<Path>) -> Self {
        Self {
            upload_root: normalize_path(upload_root.as_ref()),
            cache_root: normalize_path(cache_root.as_ref()),
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Lexical containment gate. Never touches the filesystem.
    ///
    /// Sources under the services cache are refused even when the cache sits
    /// inside the upload root; those are other requests' staged files.
    pub fn check(&self, raw_source: &str) -> Result<PathBuf> {
        resolve_within_root(raw_source, &self.upload_root)
            .filter(|source| !source.starts_with(&self.cache_root))
            .ok_or_else(invalid_file_uri)
    }

    /// Moves `raw_source` to `<cache_root>/<stem>-<id>.<ext>`.
    ///
    /// On relocation failure the source file is removed so nothing is left
    /// behind in the host upload directory.
    pub fn stage(&self, raw_source: &str, id: &RequestId) -> Result<PathBuf> {
        let source = self.check(raw_source)?;

        // Symlinks and directories are refused; a missing file falls through
        // to the relocation error.
        if let Ok(metadata) = fs::symlink_metadata(&source) {
            if !metadata.file_type().is_file() {
                tracing::warn!(source = %source.display(), "refusing to stage non-regular file");
                return Err(invalid_file_uri());
            }
        }

        let destination = self.destination_for(&source, id)?;

        if let Err(error) = relocate(&source, &destination) {
            tracing::warn!(
                source = %source.display(),
                destination = %destination.display(),
                "failed to stage upload: {error}"
            );
            let _ = remove_if_exists(&source);
            let _ = remove_if_exists(&destination);
            return Err(BrokerError::io(
                format!(
                    "failed to rename {} to {}",
                    source.display(),
                    destination.display()
                ),
                error,
            ));
        }

        Ok(destination)
    }

    /// Removes a staged file or artifact. A missing file is not an error.
    pub fn unstage(&self, path: &Path) -> Result<()> {
        remove_if_exists(path)
            .map_err(|error| BrokerError::io(format!("failed to remove {}", path.display()), error))
    }

    fn destination_for(&self, source: &Path, id: &RequestId) -> Result<PathBuf> {
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| BrokerError::Rejected("upload path has no file name".to_string()))?;

        let file_name = match source.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{stem}-{id}.{ext}"),
            None => format!("{stem}-{id}"),
        };

        let destination = normalize_path(&self.cache_root.join(file_name));
        if destination.parent() != Some(self.cache_root.as_path()) {
            return Err(BrokerError::Rejected(
                "upload destination escapes the services cache".to_string(),
            ));
        }

        Ok(destination)
    }
}

fn invalid_file_uri() -> BrokerError {
    BrokerError::Rejected(
        "Service invocation error. Invalid {file_uri} field! Abortion for security reasons."
            .to_string(),
    )
}

fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            // Rename cannot cross filesystems; fall back to copy + delete.
            if !source.is_file() {
                return Err(rename_error);
            }
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

/// Resolves `raw` against `root` and returns it only if it stays strictly
/// below `root` after lexical normalization.
pub fn resolve_within_root(raw: &str, root: &Path) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let path = PathBuf::from(raw);
    let requested = if path.is_absolute() {
        path
    } else {
        root.join(path)
    };

    let normalized_root = normalize_path(root);
    let normalized = normalize_path(&requested);

    if normalized != normalized_root && normalized.starts_with(&normalized_root) {
        Some(normalized)
    } else {
        None
    }
}

/// Purely lexical: `..` pops the previous component and symlinks are not
/// resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }

    normalized
}
