//! Process-wide fitted model cache.
//!
//! The model is trained once, either eagerly through [`ModelRegistry::warm_up`]
//! or lazily on the first [`ModelRegistry::current`], and then shared by every
//! scorer. Reads never invalidate it. When the persisted tables change the
//! host calls [`ModelRegistry::retrain`], which swaps in a new instance and
//! bumps the generation counter.

use crate::ridge::{FittedModel, RidgeRegression};
use mmm_core::error::MmmResult;
use mmm_core::types::TrainingSet;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Where training data comes from.
pub trait TrainingSource: Send + Sync {
    fn load(&self) -> MmmResult<TrainingSet>;
}

impl<F> TrainingSource for F
where
    F: Fn() -> MmmResult<TrainingSet> + Send + Sync,
{
    fn load(&self) -> MmmResult<TrainingSet> {
        self()
    }
}

pub struct ModelRegistry {
    source: Box<dyn TrainingSource>,
    ridge: RidgeRegression,
    model: RwLock<Option<Arc<FittedModel>>>,
    /// Serialises training so concurrent first reads fit only once.
    training: Mutex<()>,
    generation: AtomicU64,
}

impl ModelRegistry {
    pub fn new(source: impl TrainingSource + 'static, ridge: RidgeRegression) -> Self {
        Self {
            source: Box::new(source),
            ridge,
            model: RwLock::new(None),
            training: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The cached model, training it first if nothing is cached yet.
    pub fn current(&self) -> MmmResult<Arc<FittedModel>> {
        if let Some(model) = self.cached() {
            return Ok(model);
        }

        let _guard = self.training.lock();
        // Another caller may have finished training while we waited.
        if let Some(model) = self.cached() {
            return Ok(model);
        }
        self.train_locked("first access")
    }

    /// The cached model without triggering training.
    pub fn cached(&self) -> Option<Arc<FittedModel>> {
        self.model.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.model.read().is_some()
    }

    /// Train now if nothing is cached. Idempotent.
    pub fn warm_up(&self) -> MmmResult<Arc<FittedModel>> {
        let _guard = self.training.lock();
        if let Some(model) = self.cached() {
            return Ok(model);
        }
        self.train_locked("warm-up")
    }

    /// Reload the training data and replace the cached model. On failure the
    /// previous model stays in place.
    pub fn retrain(&self) -> MmmResult<Arc<FittedModel>> {
        let _guard = self.training.lock();
        let previous = self.cached().map(|m| m.run_id());
        match self.train_locked("retrain") {
            Ok(model) => {
                metrics::counter!("model.retrains").increment(1);
                info!(
                    previous_run_id = ?previous,
                    run_id = %model.run_id(),
                    "Model replaced"
                );
                Ok(model)
            }
            Err(e) => {
                warn!(error = %e, "Retrain failed, keeping previous model");
                Err(e)
            }
        }
    }

    /// Number of models trained so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn train_locked(&self, reason: &str) -> MmmResult<Arc<FittedModel>> {
        let set = self.source.load()?;
        let model = Arc::new(self.ridge.fit(&set)?);

        *self.model.write() = Some(model.clone());
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        metrics::gauge!("model.r_squared").set(model.r_squared());
        info!(
            reason = reason,
            generation = generation,
            run_id = %model.run_id(),
            "Model cached"
        );

        Ok(model)
    }
}
