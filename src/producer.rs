//! NATS publisher for prediction responses

use crate::types::prediction::PredictionResponse;
use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::debug;

/// Publishes responses to the request's reply subject, or to a fallback subject
#[derive(Clone)]
pub struct ResponsePublisher {
    client: Client,
    subject: String,
}

impl ResponsePublisher {
    /// Create a new response publisher with a fallback subject
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a response
    pub async fn publish(&self, response: &PredictionResponse, reply: Option<&Subject>) -> Result<()> {
        let payload = serde_json::to_vec(response)?;
        let target = reply.map_or_else(|| self.subject.clone(), |r| r.to_string());

        self.client.publish(target.clone(), payload.into()).await?;

        debug!(
            request_id = %response.request_id,
            subject = %target,
            status = ?response.status,
            "Published prediction response"
        );

        Ok(())
    }

    /// Get the fallback subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
