use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::info;

use crate::lineage::Artifact;

const EXPORT_PREFIX: &str = "viral-thumbnail";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes the artifact image to `dir` as `viral-thumbnail-<created ms>.<ext>` and returns
/// the path. Existing files are never overwritten; a numeric suffix is added instead.
pub fn export_artifact(artifact: &Artifact, dir: &Path) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let stamp = artifact
        .created_at()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let extension = artifact.image().file_extension();

    let mut attempt = 0u32;
    loop {
        let file_name = match attempt {
            0 => format!("{EXPORT_PREFIX}-{stamp}.{extension}"),
            n => format!("{EXPORT_PREFIX}-{stamp}-{n}.{extension}"),
        };
        let path = dir.join(file_name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(artifact.image().bytes())
                    .map_err(|source| ExportError::Io {
                        path: path.clone(),
                        source,
                    })?;
                info!(artifact_id = %artifact.id(), path = %path.display(), "exported thumbnail");
                return Ok(path);
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(source) => return Err(ExportError::Io { path, source }),
        }
    }
}
