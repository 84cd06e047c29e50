//! Simple request/response driver.
//!
//! One POST of the submission envelope, one parsed response. Used for
//! endpoints that bypass the queue entirely.

use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::protocol::{PredictResponse, SubmitEnvelope, RATE_LIMIT_MARKER};

/// Fixed invocation path for the simple driver.
const PREDICT_PATH: &str = "/api/predict";

/// One-shot POST driver.
pub struct SimpleDriver;

impl SimpleDriver {
    /// POST the envelope and classify the response.
    ///
    /// An `error` field with the rate-limit marker maps to
    /// [`ClientError::RateLimited`], any other `error` to
    /// [`ClientError::Remote`], and a body with neither `data` nor `error`
    /// to [`ClientError::MalformedResponse`].
    pub async fn invoke(
        http: &reqwest::Client,
        root_url: &str,
        envelope: &SubmitEnvelope,
    ) -> Result<Vec<Value>> {
        let url = format!("{}{}", root_url.trim_end_matches('/'), PREDICT_PATH);
        tracing::debug!(%url, fn_index = envelope.fn_index, "simple driver request");

        let resp = http.post(&url).json(envelope).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        let parsed: PredictResponse = serde_json::from_str(&body).map_err(|_| {
            ClientError::MalformedResponse(format!(
                "non-JSON response (status {status}): {}",
                truncate(&body, 200)
            ))
        })?;

        Self::classify(parsed)
    }

    fn classify(resp: PredictResponse) -> Result<Vec<Value>> {
        if let Some(error) = resp.error {
            if error.to_lowercase().contains(RATE_LIMIT_MARKER) {
                return Err(ClientError::RateLimited(error));
            }
            return Err(ClientError::Remote(error));
        }
        resp.data
            .ok_or_else(|| ClientError::MalformedResponse("response carried no data".into()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
