//! Local staging of downloaded artifacts.
//!
//! A downloaded dump is validated by reading it end to end (through gzip
//! when compressed) and split at its section markers into one file per
//! component. A dump without markers is kept whole as table data.

use dbsync_core::artifact::{ArtifactManifest, parse_section_marker};
use dbsync_core::error::TransferError;
use dbsync_core::plan::restore::StagedArtifact;
use dbsync_core::selection::{Component, Compression};
use dbsync_core::{Result, SyncError};
use flate2::read::MultiGzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// A private working directory, removed when dropped.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("dbsync-").tempdir_in(root)?;
        debug!("[Staging] Created {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where a downloaded artifact is written.
    pub fn download_path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(file_name)
    }

    /// Validates `local` and splits it into section files.
    pub async fn stage(&self, local: &Path, compression: Compression) -> Result<StagedArtifact> {
        let local = local.to_path_buf();
        let out_dir = self.dir.path().join("sections");
        tokio::task::spawn_blocking(move || stage_artifact(&local, compression, &out_dir))
            .await
            .map_err(|e| SyncError::io(format!("staging task failed: {e}")))?
    }
}

fn corrupt(path: &Path, message: impl Into<String>) -> SyncError {
    TransferError::Corrupt {
        path: path.display().to_string(),
        message: message.into(),
    }
    .into()
}

fn local(path: &Path, err: std::io::Error) -> SyncError {
    TransferError::Local {
        path: path.display().to_string(),
        message: err.to_string(),
    }
    .into()
}

struct SectionWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SectionWriter {
    fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(|e| local(&path, e))?;
        Ok(Self {
            out: BufWriter::new(file),
            path,
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes).map_err(|e| local(&self.path, e))
    }

    fn finish(mut self) -> Result<()> {
        self.out.flush().map_err(|e| local(&self.path, e))
    }
}

/// Blocking: reads `local` once, writing `{component}.sql` files into `out_dir`.
pub fn stage_artifact(local_path: &Path, compression: Compression, out_dir: &Path) -> Result<StagedArtifact> {
    let file = File::open(local_path).map_err(|e| local(local_path, e))?;
    let size = file.metadata().map_err(|e| local(local_path, e))?.len();
    if size == 0 {
        return Err(corrupt(local_path, "artifact is empty"));
    }
    std::fs::create_dir_all(out_dir).map_err(|e| local(out_dir, e))?;

    let mut reader: Box<dyn BufRead> = match compression {
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        Compression::Plain => Box::new(BufReader::new(file)),
    };

    let mut sections: BTreeMap<Component, PathBuf> = BTreeMap::new();
    let mut current: Option<SectionWriter> = None;
    let mut sectioned = false;
    let mut lines = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| corrupt(local_path, e.to_string()))?;
        if read == 0 {
            break;
        }
        lines += 1;

        let marker = std::str::from_utf8(&line).ok().and_then(parse_section_marker);
        if lines == 1 {
            sectioned = marker.is_some();
            if !sectioned {
                let path = out_dir.join(format!("{}.sql", Component::TableData));
                current = Some(SectionWriter::create(path.clone())?);
                sections.insert(Component::TableData, path);
            }
        }

        match marker.filter(|_| sectioned) {
            Some(component) => {
                if sections.contains_key(&component) {
                    return Err(corrupt(
                        local_path,
                        format!("section {component} appears more than once"),
                    ));
                }
                if let Some(previous) = current.take() {
                    previous.finish()?;
                }
                let path = out_dir.join(format!("{component}.sql"));
                current = Some(SectionWriter::create(path.clone())?);
                sections.insert(component, path);
            }
            None => {
                if let Some(writer) = current.as_mut() {
                    writer.write(&line)?;
                }
            }
        }
    }

    if let Some(writer) = current.take() {
        writer.finish()?;
    }
    if lines == 0 {
        return Err(corrupt(local_path, "artifact contains no data"));
    }

    let manifest = if sectioned {
        ArtifactManifest::sectioned(sections.keys().copied())
    } else {
        ArtifactManifest::unsectioned()
    };
    debug!(
        "[Staging] {} holds {:?}",
        local_path.display(),
        manifest.components()
    );
    Ok(StagedArtifact { manifest, sections })
}
