use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::Semaphore;
use tokio::task;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::engine::{InferenceEngine, RegressionModel};
use crate::error::ApiError;
use crate::features::FeatureBatch;

/// Shared state handed to every request:
/// - engine: the model loaded at startup, never mutated afterwards
/// - semaphore: caps the number of concurrent inferences
/// - infer_timeout: upper bound on queueing + running one inference
pub struct AppState {
    pub engine: Arc<dyn InferenceEngine>,
    pub semaphore: Arc<Semaphore>,
    pub max_concurrent_infer: usize,
    pub infer_timeout: Duration,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        max_concurrent_infer: usize,
        infer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            semaphore: Arc::new(Semaphore::new(max_concurrent_infer)),
            max_concurrent_infer,
            infer_timeout,
        })
    }

    /// Load the configured model artifact and wrap it.
    pub fn from_config(cfg: &ServerConfig) -> Result<Arc<Self>> {
        if cfg.max_concurrent_infer == 0 {
            bail!("max_concurrent_infer must be at least 1");
        }
        let model = RegressionModel::load(&cfg.model_path)?;
        Ok(Self::new(
            Arc::new(model),
            cfg.max_concurrent_infer,
            cfg.infer_timeout(),
        ))
    }

    pub async fn predict(&self, batch: FeatureBatch) -> Result<Vec<Vec<f32>>, ApiError> {
        if batch.rows() == 0 {
            return Ok(Vec::new());
        }

        let expected = self.engine.input_width();
        if batch.row_width() != expected {
            return Err(ApiError::Shape(format!(
                "model expects {} features per row, got {} (shape {:?})",
                expected,
                batch.row_width(),
                batch.shape()
            )));
        }

        let engine = Arc::clone(&self.engine);
        let semaphore = Arc::clone(&self.semaphore);
        let run = async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("inference queue closed"))?;

            // the permit moves into the worker: it is held until the forward
            // pass returns, even if this request has already timed out
            let out = task::spawn_blocking(move || {
                let _permit = permit;
                engine.forward(&batch)
            })
            .await??;
            Ok::<_, ApiError>(out)
        };

        let out = match timeout(self.infer_timeout, run).await {
            Ok(res) => res?,
            Err(_) => return Err(ApiError::Timeout(self.infer_timeout.as_millis() as u64)),
        };

        if out.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ApiError::Inference(anyhow!(
                "model produced a non-finite prediction"
            )));
        }
        Ok(out)
    }
}
