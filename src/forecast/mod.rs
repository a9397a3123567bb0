pub mod blender;
pub mod predictor;

pub use blender::ForecastBlender;
pub use predictor::{BasePredictor, HttpPredictor};
