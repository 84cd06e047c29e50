//! Out-of-band upload indirection for file-bearing parameters.
//!
//! Every file value across all parameters of one invocation, including
//! nested per-parameter lists, is batched into a single multipart POST.
//! Positional association survives through an index map, so each returned
//! server reference lands back at the slot its local path came from.
//!
//! A non-success upload response degrades to the original local references
//! unchanged; this is deliberate, logged, and never escalated to an error
//! so servers without an upload endpoint keep working with server-local
//! paths.

use serde_json::Value;

use crate::codec::{codec_for, ComponentKind};
use crate::error::{ClientError, Result};

/// Where one batched file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSlot {
    /// Parameter position in the invocation argument list.
    pub param: usize,
    /// Position inside a list-valued parameter, if any.
    pub inner: Option<usize>,
}

/// Flat batch of local file paths plus their originating slots.
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub paths: Vec<String>,
    pub slots: Vec<UploadSlot>,
}

impl UploadBatch {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Gather every file-bearing value into one flat batch.
pub fn collect_uploads(kinds: &[ComponentKind], values: &[Value]) -> UploadBatch {
    let mut batch = UploadBatch::default();
    for (param, (kind, value)) in kinds.iter().zip(values).enumerate() {
        if !codec_for(*kind).uploads_files() {
            continue;
        }
        match value {
            Value::String(path) => {
                batch.paths.push(path.clone());
                batch.slots.push(UploadSlot { param, inner: None });
            }
            Value::Array(items) => {
                for (inner, item) in items.iter().enumerate() {
                    if let Value::String(path) = item {
                        batch.paths.push(path.clone());
                        batch.slots.push(UploadSlot {
                            param,
                            inner: Some(inner),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    batch
}

/// Write server references back to the positions their paths came from.
pub fn substitute(values: &mut [Value], slots: &[UploadSlot], refs: &[String]) {
    for (slot, reference) in slots.iter().zip(refs) {
        let target = match slot.inner {
            None => values.get_mut(slot.param),
            Some(inner) => values
                .get_mut(slot.param)
                .and_then(|v| v.as_array_mut())
                .and_then(|arr| arr.get_mut(inner)),
        };
        if let Some(target) = target {
            *target = Value::String(reference.clone());
        }
    }
}

/// POST the batch as one multipart request to the fixed upload path.
///
/// Returns the server-assigned references, order-aligned with the batch.
async fn post_batch(
    http: &reqwest::Client,
    root_url: &str,
    paths: &[String],
) -> Result<Option<Vec<String>>> {
    let mut form = reqwest::multipart::Form::new();
    for path in paths {
        let bytes = std::fs::read(path)?;
        let file_name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        form = form.part(
            "files",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );
    }

    let url = format!("{}/upload", root_url.trim_end_matches('/'));
    let resp = http.post(&url).multipart(form).send().await?;
    if !resp.status().is_success() {
        tracing::warn!(
            status = %resp.status(),
            "upload rejected, keeping local file references"
        );
        return Ok(None);
    }

    let refs: Vec<String> = resp.json().await.map_err(|e| {
        ClientError::MalformedResponse(format!("upload response was not a string array: {e}"))
    })?;
    if refs.len() != paths.len() {
        return Err(ClientError::MalformedResponse(format!(
            "upload returned {} references for {} files",
            refs.len(),
            paths.len()
        )));
    }
    Ok(Some(refs))
}

/// Run the full upload indirection over an argument list.
///
/// Returns the values with server references substituted in place, or the
/// original values untouched when there was nothing to upload or the
/// server declined the batch.
pub async fn apply_uploads(
    http: &reqwest::Client,
    root_url: &str,
    kinds: &[ComponentKind],
    mut values: Vec<Value>,
) -> Result<Vec<Value>> {
    let batch = collect_uploads(kinds, &values);
    if batch.is_empty() {
        return Ok(values);
    }

    tracing::debug!(files = batch.paths.len(), "uploading file parameters");
    if let Some(refs) = post_batch(http, root_url, &batch.paths).await? {
        substitute(&mut values, &batch.slots, &refs);
    }
    Ok(values)
}
