//! Model registry: resolves symbolic model names to local artifacts.
//!
//! Whisper models are stored as full repository snapshots under
//! `<models>/whisper/<name>/`; the presence of `model.bin` in that
//! directory is the cache sentinel. Downloads are atomic (staging
//! directory renamed into place) and re-entrant `ensure` calls for the
//! same name block on a per-name lock instead of duplicating work.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ModelError;

/// Progress callback signature shared by every long-running load/download:
/// `(message, percent)` with percent in `[0, 100]`.
pub type ProgressFn = dyn Fn(&str, f32) + Send + Sync;

/// Known ASR models and their repository identifiers.
pub const WHISPER_MODELS: &[(&str, &str)] = &[
    ("tiny", "Systran/faster-whisper-tiny"),
    ("base", "Systran/faster-whisper-base"),
    ("small", "Systran/faster-whisper-small"),
    ("medium", "Systran/faster-whisper-medium"),
    ("large-v2", "Systran/faster-whisper-large-v2"),
    ("large-v3", "Systran/faster-whisper-large-v3"),
    // French-specialized distillation
    ("large-v3-french", "bofenghuang/whisper-large-v3-french-distil-dec16"),
];

/// File that must exist inside a model directory for it to count as cached.
pub const MODEL_SENTINEL: &str = "model.bin";

/// Diarization artifact, a single ONNX export under the models root.
pub const DIARIZATION_MODEL_FILE: &str = "diar_sortformer_4spk-v1.onnx";

const HUB_BASE: &str = "https://huggingface.co";

#[derive(Debug, Deserialize)]
struct RepoManifest {
    #[serde(default)]
    siblings: Vec<RepoFile>,
}

#[derive(Debug, Deserialize)]
struct RepoFile {
    rfilename: String,
}

/// Resolves model names to local paths, downloading on demand.
pub struct ModelRegistry {
    models_dir: PathBuf,
    client: reqwest::Client,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Result<Self, ModelError> {
        let models_dir = models_dir.into();
        std::fs::create_dir_all(&models_dir).map_err(|e| ModelError::Download {
            name: "registry".to_string(),
            detail: format!("cannot create models directory: {e}"),
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3600))
            .build()
            .map_err(|e| ModelError::Download {
                name: "registry".to_string(),
                detail: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            models_dir,
            client,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Repository identifier for a known model name.
    pub fn repo_id(name: &str) -> Result<&'static str, ModelError> {
        WHISPER_MODELS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, repo)| *repo)
            .ok_or_else(|| ModelError::NotFound {
                name: name.to_string(),
            })
    }

    /// Local directory a model resolves to, whether or not it is cached.
    pub fn whisper_model_dir(&self, name: &str) -> Result<PathBuf, ModelError> {
        Self::repo_id(name)?;
        Ok(self.models_dir.join("whisper").join(name))
    }

    /// Whether the model is fully cached locally.
    pub fn is_downloaded(&self, name: &str) -> Result<bool, ModelError> {
        Ok(self.whisper_model_dir(name)?.join(MODEL_SENTINEL).exists())
    }

    /// Path of the diarization artifact under the models root.
    pub fn diarization_model_path(&self) -> PathBuf {
        self.models_dir.join("sortformer").join(DIARIZATION_MODEL_FILE)
    }

    /// Approximate download sizes, for display before a download starts.
    pub fn model_sizes() -> &'static [(&'static str, &'static str)] {
        &[
            ("tiny", "75 MB"),
            ("base", "150 MB"),
            ("small", "500 MB"),
            ("medium", "1.5 GB"),
            ("large-v2", "3 GB"),
            ("large-v3", "3 GB"),
            ("large-v3-french", "1.6 GB"),
            ("sortformer", "700 MB"),
        ]
    }

    /// Return the local model directory, downloading the repository
    /// snapshot first if it is not cached.
    ///
    /// Concurrent calls for the same name serialize on a per-name lock:
    /// the second caller blocks until the first download finishes, then
    /// sees the cache hit.
    pub async fn ensure(
        &self,
        name: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf, ModelError> {
        let model_dir = self.whisper_model_dir(name)?;

        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if model_dir.join(MODEL_SENTINEL).exists() {
            info!("Model {name} already present: {}", model_dir.display());
            if let Some(cb) = progress {
                cb(&format!("Model {name} ready"), 100.0);
            }
            return Ok(model_dir);
        }

        let repo_id = Self::repo_id(name)?;
        info!("Downloading model {name} from {repo_id}...");
        if let Some(cb) = progress {
            cb(&format!("Downloading {name}..."), 0.0);
        }

        let staging = self
            .models_dir
            .join("whisper")
            .join(format!(".{name}.download"));
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging)
                .await
                .map_err(|e| download_error(name, &e))?;
        }

        self.snapshot_download(name, repo_id, &staging, progress)
            .await?;

        if !staging.join(MODEL_SENTINEL).exists() {
            return Err(ModelError::Download {
                name: name.to_string(),
                detail: format!("repository {repo_id} has no {MODEL_SENTINEL}"),
            });
        }

        if let Some(parent) = model_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| download_error(name, &e))?;
        }
        tokio::fs::rename(&staging, &model_dir)
            .await
            .map_err(|e| download_error(name, &e))?;

        info!("Model {name} downloaded: {}", model_dir.display());
        if let Some(cb) = progress {
            cb(&format!("Model {name} ready"), 100.0);
        }

        Ok(model_dir)
    }

    /// Fetch the full repository tree into `dest`.
    async fn snapshot_download(
        &self,
        name: &str,
        repo_id: &str,
        dest: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<(), ModelError> {
        let manifest_url = format!("{HUB_BASE}/api/models/{repo_id}");
        let response = self
            .client
            .get(&manifest_url)
            .send()
            .await
            .map_err(|e| download_error(name, &e))?;
        if !response.status().is_success() {
            return Err(ModelError::Download {
                name: name.to_string(),
                detail: format!("manifest request failed with status {}", response.status()),
            });
        }
        let manifest: RepoManifest = response.json().await.map_err(|e| download_error(name, &e))?;
        if manifest.siblings.is_empty() {
            return Err(ModelError::Download {
                name: name.to_string(),
                detail: format!("repository {repo_id} is empty"),
            });
        }

        let total = manifest.siblings.len();
        for (index, file) in manifest.siblings.iter().enumerate() {
            let percent = index as f32 / total as f32 * 100.0;
            if let Some(cb) = progress {
                cb(
                    &format!("Downloading {name} ({}/{total}): {}", index + 1, file.rfilename),
                    percent,
                );
            }
            self.download_file(name, repo_id, &file.rfilename, dest)
                .await?;
        }

        Ok(())
    }

    async fn download_file(
        &self,
        name: &str,
        repo_id: &str,
        rfilename: &str,
        dest: &Path,
    ) -> Result<(), ModelError> {
        if rfilename.starts_with('/') || rfilename.split('/').any(|part| part == "..") {
            return Err(ModelError::Download {
                name: name.to_string(),
                detail: format!("unsafe path in repository manifest: {rfilename}"),
            });
        }
        let url = format!("{HUB_BASE}/{repo_id}/resolve/main/{rfilename}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| download_error(name, &e))?;
        if !response.status().is_success() {
            return Err(ModelError::Download {
                name: name.to_string(),
                detail: format!("{rfilename}: status {}", response.status()),
            });
        }

        let target = dest.join(rfilename);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| download_error(name, &e))?;
        }

        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| download_error(name, &e))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(name, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| download_error(name, &e))?;
        }
        file.sync_all().await.map_err(|e| {
            warn!("sync failed for {}: {e}", target.display());
            download_error(name, &e)
        })?;

        Ok(())
    }
}

fn download_error(name: &str, err: &dyn std::fmt::Display) -> ModelError {
    ModelError::Download {
        name: name.to_string(),
        detail: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        let err = registry.whisper_model_dir("colossal-v9").unwrap_err();
        assert!(matches!(err, ModelError::NotFound { name } if name == "colossal-v9"));
    }

    #[test]
    fn sentinel_gates_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        assert!(!registry.is_downloaded("tiny").unwrap());

        let model_dir = registry.whisper_model_dir("tiny").unwrap();
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join(MODEL_SENTINEL), b"stub").unwrap();
        assert!(registry.is_downloaded("tiny").unwrap());
    }

    #[tokio::test]
    async fn ensure_returns_cached_dir_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        let model_dir = registry.whisper_model_dir("base").unwrap();
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join(MODEL_SENTINEL), b"stub").unwrap();

        let seen = std::sync::Mutex::new(Vec::new());
        let cb = |msg: &str, pct: f32| {
            seen.lock().unwrap().push((msg.to_string(), pct));
        };
        let resolved = registry.ensure("base", Some(&cb)).await.unwrap();
        assert_eq!(resolved, model_dir);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().map(|(_, p)| *p), Some(100.0));
    }

    #[test]
    fn diarization_path_is_under_models_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        let path = registry.diarization_model_path();
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with(format!("sortformer/{DIARIZATION_MODEL_FILE}")));
    }
}
