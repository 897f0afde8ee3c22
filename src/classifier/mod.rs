//! Classifier - Scoring Service Adapter
//!
//! ## Responsibilities
//!
//! - Send feature vectors to the external classification service
//! - Handle response parsing
//!
//! The service call carries a short fixed timeout; live streaming tolerates a
//! slow or absent classifier by degrading, so the timeout is the only
//! backpressure applied here.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prediction request payload.
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub features: Vec<f64>,
}

/// Prediction returned by the scoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub class_id: i32,
    pub class_name: String,
    pub probabilities: Vec<f64>,
}

/// Scoring operations consumed by the streaming dispatcher.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, features: &[f64]) -> Result<Prediction>;
}

/// HTTP classifier client.
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpClassifier {
    /// Create a client with the default 2 second timeout.
    pub fn new(base_url: String) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(2))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Check classifier availability.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn predict(&self, features: &[f64]) -> Result<Prediction> {
        let url = format!("{}/predict", self.base_url);
        let payload = PredictRequest {
            features: features.to_vec(),
        };

        let resp = self.client.post(&url).json(&payload).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Classifier(format!(
                "prediction failed: {}",
                resp.status()
            )));
        }

        let prediction: Prediction = resp.json().await?;
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_request_serialization() {
        let req = PredictRequest {
            features: vec![1.0, 2.5],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"features":[1.0,2.5]}"#);
    }

    #[test]
    fn test_prediction_deserialization() {
        let json = r#"{"class_id":3,"class_name":"fist","probabilities":[0.1,0.1,0.8]}"#;
        let pred: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(pred.class_id, 3);
        assert_eq!(pred.class_name, "fist");
        assert_eq!(pred.probabilities.len(), 3);
    }
}
