//! Filesystem implementation of the `ArtifactStore` port.
//!
//! Each plan is one file `<dir>/<id>.plan`:
//!
//! ```text
//! infrasync-plan <format>\n
//! sha256:<hex digest of the gzip body>\n
//! <gzip-compressed JSON PlanArtifact>
//! ```
//!
//! Run records live at `<dir>/runs/<account>/<container>/<key>.json`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use infrasync_common::RunRecord;
use sha2::{Digest, Sha256};

use crate::application::ports::ArtifactStore;
use crate::domain::error::PlanError;
use crate::domain::manifest::hex_encode;
use crate::domain::plan::{ARTIFACT_FORMAT_VERSION, PlanArtifact, validate_artifact_id};
use crate::domain::state::StateRef;
use crate::infra::fs::{remove_if_exists, write_atomic};

const MAGIC: &str = "infrasync-plan";
const EXTENSION: &str = "plan";

/// Encode an artifact into its on-disk form.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode_artifact(artifact: &PlanArtifact) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(artifact).context("serializing plan artifact")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).context("compressing plan artifact")?;
    let body = encoder.finish().context("compressing plan artifact")?;

    let mut out = format!(
        "{MAGIC} {ARTIFACT_FORMAT_VERSION}\nsha256:{}\n",
        hex_encode(&Sha256::digest(&body))
    )
    .into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode and verify an artifact read from disk.
///
/// # Errors
///
/// Returns [`PlanError::CorruptArtifact`] if the header, digest, or payload
/// is invalid.
pub fn decode_artifact(id: &str, bytes: &[u8]) -> Result<PlanArtifact> {
    let corrupt = |reason: &str| PlanError::CorruptArtifact {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let (header, rest) = split_line(bytes).ok_or_else(|| corrupt("missing header"))?;
    let format = header
        .strip_prefix(MAGIC)
        .map(str::trim)
        .ok_or_else(|| corrupt("not a plan artifact"))?;
    if format != ARTIFACT_FORMAT_VERSION.to_string() {
        return Err(corrupt(&format!("unsupported format version {format}")).into());
    }

    let (digest_line, body) = split_line(rest).ok_or_else(|| corrupt("missing digest"))?;
    let expected = digest_line
        .strip_prefix("sha256:")
        .ok_or_else(|| corrupt("missing digest"))?;
    if hex_encode(&Sha256::digest(body)) != expected {
        return Err(corrupt("digest mismatch").into());
    }

    let mut json = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut json)
        .map_err(|e| corrupt(&format!("decompression failed: {e}")))?;
    let artifact: PlanArtifact = serde_json::from_slice(&json)
        .map_err(|e| corrupt(&format!("invalid payload: {e}")))?;
    if artifact.id != id {
        return Err(corrupt("artifact id does not match file name").into());
    }
    Ok(artifact)
}

fn split_line(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let end = bytes.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&bytes[..end]).ok()?;
    Some((line, &bytes[end + 1..]))
}

/// Artifact and run-record store in a local directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    fn run_path(&self, state: &StateRef) -> PathBuf {
        let mut path = self
            .dir
            .join("runs")
            .join(&state.storage_account)
            .join(&state.container);
        for segment in state.key.split('/') {
            path.push(segment);
        }
        let name = path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        path.with_file_name(format!("{name}.json"))
    }
}

fn load_artifact_sync(path: &Path, id: &str) -> Result<PlanArtifact> {
    match std::fs::read(path) {
        Ok(bytes) => decode_artifact(id, &bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PlanError::ArtifactNotFound(id.to_string()).into())
        }
        Err(e) => Err(e).with_context(|| format!("reading plan artifact {}", path.display())),
    }
}

fn list_artifacts_sync(dir: &Path) -> Result<Vec<PlanArtifact>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("listing artifacts in {}", dir.display()));
        }
    };
    let mut artifacts = Vec::new();
    for entry in entries {
        let path = entry.context("reading artifact directory entry")?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match load_artifact_sync(&path, id) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable artifact"),
        }
    }
    artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(artifacts)
}

fn load_run_sync(path: &Path) -> Result<Option<RunRecord>> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .with_context(|| format!("parsing run record {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading run record {}", path.display())),
    }
}

impl ArtifactStore for FsArtifactStore {
    async fn save_artifact(&self, artifact: &PlanArtifact) -> Result<()> {
        validate_artifact_id(&artifact.id)?;
        let path = self.artifact_path(&artifact.id);
        let bytes = encode_artifact(artifact)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .context("artifact save task panicked")?
    }

    async fn load_artifact(&self, id: &str) -> Result<PlanArtifact> {
        validate_artifact_id(id)?;
        let path = self.artifact_path(id);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || load_artifact_sync(&path, &id))
            .await
            .context("artifact load task panicked")?
    }

    async fn delete_artifact(&self, id: &str) -> Result<bool> {
        validate_artifact_id(id)?;
        let path = self.artifact_path(id);
        tokio::task::spawn_blocking(move || remove_if_exists(&path))
            .await
            .context("artifact delete task panicked")?
    }

    async fn list_artifacts(&self) -> Result<Vec<PlanArtifact>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || list_artifacts_sync(&dir))
            .await
            .context("artifact list task panicked")?
    }

    async fn load_run(&self, state: &StateRef) -> Result<Option<RunRecord>> {
        let path = self.run_path(state);
        tokio::task::spawn_blocking(move || load_run_sync(&path))
            .await
            .context("run record load task panicked")?
    }

    async fn save_run(&self, state: &StateRef, record: &RunRecord) -> Result<()> {
        let path = self.run_path(state);
        let content = serde_json::to_vec_pretty(record).context("serializing run record")?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .context("run record save task panicked")?
    }
}
