//! # Model persistence
//!
//! A trained model is stored as one JSON envelope:
//!
//! ```text
//! { "format": "rom-engine/model", "format_version": 1,
//!   "sha256": "<hex of payload>", "payload": "<ModelBundle as JSON>" }
//! ```
//!
//! The payload is kept as a string so the checksum covers its exact bytes.
//! Writes go to a sibling temp file that is synced and renamed over the
//! target, so a reader sees either the previous file or the complete new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RomConfiguration;
use crate::interpolate::{CoefficientInterpolator, ParameterBounds};
use crate::parametric::PerformanceMetrics;
use crate::types::{DmdResult, PodResult, RomError, RomResult};

pub const FORMAT: &str = "rom-engine/model";
pub const FORMAT_VERSION: u32 = 1;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Everything needed to restore a trained parametric ROM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub config: RomConfiguration,
    pub pod: PodResult,
    pub dmd: Option<DmdResult>,
    pub interpolator: CoefficientInterpolator,
    pub bounds: ParameterBounds,
    pub metrics: PerformanceMetrics,
    pub trained: bool,
    pub version: u64,
}

impl ModelBundle {
    /// Cross-check the stored artifacts against each other.
    pub fn validate(&self) -> RomResult<()> {
        if !self.trained {
            return Err(RomError::CorruptModel("bundle is not marked trained".into()));
        }
        self.config.validate()?;
        self.pod.validate()?;
        if let Some(dmd) = &self.dmd {
            dmd.validate()?;
            if dmd.n_dofs() != self.pod.n_dofs() {
                return Err(RomError::DimensionMismatch {
                    context: "stored DMD model",
                    expected: self.pod.n_dofs(),
                    found: dmd.n_dofs(),
                });
            }
        }
        self.interpolator.validate()?;
        if self.interpolator.n_outputs() != self.pod.truncation_index {
            return Err(RomError::DimensionMismatch {
                context: "stored interpolator outputs",
                expected: self.pod.truncation_index,
                found: self.interpolator.n_outputs(),
            });
        }
        if self.bounds.ranges.len() != self.interpolator.n_parameters() {
            return Err(RomError::DimensionMismatch {
                context: "stored parameter bounds",
                expected: self.interpolator.n_parameters(),
                found: self.bounds.ranges.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: String,
    format_version: u32,
    sha256: String,
    payload: String,
}

/// Compute SHA-256 of bytes as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write bytes to `path` through a synced sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> RomResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path_for(path);
    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Unique per process and per call, so concurrent saves never share a temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

/// Serialize a bundle and write it atomically.
pub fn save_bundle(path: &Path, bundle: &ModelBundle) -> RomResult<()> {
    if !bundle.trained {
        return Err(RomError::NotTrained("ParametricRom"));
    }
    let payload = serde_json::to_string(bundle)?;
    let envelope = Envelope {
        format: FORMAT.to_string(),
        format_version: FORMAT_VERSION,
        sha256: sha256_hex(payload.as_bytes()),
        payload,
    };
    let bytes = serde_json::to_vec(&envelope)?;
    write_atomic(path, &bytes)?;
    log::info!(
        "saved model v{} to {} ({} bytes)",
        bundle.version,
        path.display(),
        bytes.len()
    );
    Ok(())
}

/// Read and verify a bundle. Every integrity failure is [`RomError::CorruptModel`].
pub fn load_bundle(path: &Path) -> RomResult<ModelBundle> {
    let bytes = fs::read(path)?;
    let envelope: Envelope = serde_json::from_slice(&bytes)
        .map_err(|e| RomError::CorruptModel(format!("unreadable envelope: {e}")))?;

    if envelope.format != FORMAT {
        return Err(RomError::CorruptModel(format!(
            "unknown format tag `{}`",
            envelope.format
        )));
    }
    if envelope.format_version != FORMAT_VERSION {
        return Err(RomError::CorruptModel(format!(
            "unsupported format version {} (expected {FORMAT_VERSION})",
            envelope.format_version
        )));
    }
    let digest = sha256_hex(envelope.payload.as_bytes());
    if digest != envelope.sha256 {
        return Err(RomError::CorruptModel(format!(
            "checksum mismatch: stored {}, computed {digest}",
            envelope.sha256
        )));
    }

    let bundle: ModelBundle = serde_json::from_str(&envelope.payload)
        .map_err(|e| RomError::CorruptModel(format!("unreadable payload: {e}")))?;
    bundle.validate().map_err(|e| match e {
        RomError::CorruptModel(_) => e,
        other => RomError::CorruptModel(other.to_string()),
    })?;
    Ok(bundle)
}

/// Serde adapter for `faer::Mat<f64>` as `{ nrows, ncols, data }`, column-major.
pub mod mat_serde {
    use faer::Mat;
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct MatRepr {
        nrows: usize,
        ncols: usize,
        data: Vec<f64>,
    }

    pub fn serialize<S: Serializer>(m: &Mat<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        let data = (0..m.ncols())
            .flat_map(|j| (0..m.nrows()).map(move |i| m[(i, j)]))
            .collect();
        MatRepr {
            nrows: m.nrows(),
            ncols: m.ncols(),
            data,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Mat<f64>, D::Error> {
        let repr = MatRepr::deserialize(deserializer)?;
        let expected = repr.nrows.checked_mul(repr.ncols);
        if expected != Some(repr.data.len()) {
            return Err(D::Error::custom(format!(
                "matrix {}x{} carries {} values",
                repr.nrows,
                repr.ncols,
                repr.data.len()
            )));
        }
        Ok(Mat::from_fn(repr.nrows, repr.ncols, |i, j| {
            repr.data[j * repr.nrows + i]
        }))
    }
}
