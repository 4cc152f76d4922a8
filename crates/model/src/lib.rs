//! Marketing-mix regression: ridge fit of weekly revenue on per-channel
//! spend, goodness of fit, and the process-wide cached model.

pub mod evaluation;
pub mod registry;
pub mod ridge;

pub use evaluation::r_squared;
pub use registry::{ModelRegistry, TrainingSource};
pub use ridge::{ChannelCoefficient, FitConfidence, FittedModel, RidgeRegression};
