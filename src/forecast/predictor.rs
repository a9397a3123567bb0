use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::{AppError, Result};

/// Opaque language-model forecasting backend.
#[async_trait]
pub trait BasePredictor: Send + Sync {
    /// Probability in [0,1] for the event described by `description`.
    async fn predict(&self, description: &str) -> Result<f64>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    question: &'a str,
    extremize: bool,
}

#[derive(Deserialize)]
struct PredictResponse {
    probability: f64,
}

/// Calls a forecasting service over HTTP: `POST {url} {question, extremize}` → `{probability}`.
pub struct HttpPredictor {
    client: reqwest::Client,
    url: String,
    extremize: bool,
}

impl HttpPredictor {
    pub fn new(url: &str, extremize: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS * 4))
            .build()?;
        Ok(Self { client, url: url.to_string(), extremize })
    }
}

#[async_trait]
impl BasePredictor for HttpPredictor {
    async fn predict(&self, description: &str) -> Result<f64> {
        let resp: PredictResponse = self
            .client
            .post(&self.url)
            .json(&PredictRequest { question: description, extremize: self.extremize })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        validate_probability(resp.probability)
    }
}

pub fn validate_probability(p: f64) -> Result<f64> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(AppError::Predictor(format!("probability {p} outside [0, 1]")))
    }
}
