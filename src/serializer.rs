//! Per-endpoint ordered serializer/deserializer application.
//!
//! A [`SerializerSet`] is resolved from an endpoint's component kinds once,
//! before any network I/O. It owns the fixed invocation pipeline pieces:
//! state placeholder insertion, arity-checked positional encoding (with the
//! upload indirection), positional decoding, remote artifact resolution,
//! and the two post-processing steps (skipped-output removal, then
//! singleton unwrapping — always in that order).

use serde_json::Value;

use crate::codec::{codec_for, ComponentKind, DeserializeContext};
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::upload;

/// Ordered codecs for one endpoint's inputs and outputs.
#[derive(Debug, Clone)]
pub struct SerializerSet {
    input_kinds: Vec<ComponentKind>,
    output_kinds: Vec<ComponentKind>,
}

impl SerializerSet {
    /// Build the set from an endpoint's resolved kinds.
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            input_kinds: endpoint.input_kinds.clone(),
            output_kinds: endpoint.output_kinds.clone(),
        }
    }

    /// Number of arguments the caller must supply (state positions are
    /// filled internally and never counted).
    pub fn expected_args(&self) -> usize {
        self.input_kinds.iter().filter(|k| !k.is_skipped()).count()
    }

    /// Insert a placeholder at every state position.
    ///
    /// Fails with an arity error before any network I/O when the caller's
    /// argument count does not match the declared non-state inputs.
    pub fn insert_state(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        let expected = self.expected_args();
        if values.len() != expected {
            return Err(ClientError::ArgumentCount {
                expected,
                got: values.len(),
            });
        }

        let mut out = Vec::with_capacity(self.input_kinds.len());
        let mut supplied = values.into_iter();
        for kind in &self.input_kinds {
            if kind.is_skipped() {
                out.push(Value::Null);
            } else {
                // Length was checked above, every non-state slot has a value.
                out.push(supplied.next().unwrap_or(Value::Null));
            }
        }
        Ok(out)
    }

    /// Apply input codecs positionally, uploading file parameters first.
    ///
    /// Expects the full positional list (after [`Self::insert_state`]).
    pub async fn serialize(
        &self,
        http: &reqwest::Client,
        root_url: &str,
        values: Vec<Value>,
    ) -> Result<Vec<Value>> {
        if values.len() != self.input_kinds.len() {
            return Err(ClientError::ArgumentCount {
                expected: self.input_kinds.len(),
                got: values.len(),
            });
        }

        let values = upload::apply_uploads(http, root_url, &self.input_kinds, values).await?;

        self.input_kinds
            .iter()
            .zip(values)
            .map(|(kind, value)| {
                if kind.is_skipped() {
                    Ok(Value::Null)
                } else {
                    codec_for(*kind).serialize(&value)
                }
            })
            .collect()
    }

    /// Apply inverse codecs positionally over one output tuple.
    pub fn deserialize(&self, values: &[Value], ctx: &DeserializeContext) -> Result<Vec<Value>> {
        if values.len() != self.output_kinds.len() {
            return Err(ClientError::MalformedResponse(format!(
                "expected {} outputs, got {}",
                self.output_kinds.len(),
                values.len()
            )));
        }

        self.output_kinds
            .iter()
            .zip(values)
            .map(|(kind, value)| {
                if kind.is_skipped() {
                    Ok(value.clone())
                } else {
                    codec_for(*kind).deserialize(value, ctx)
                }
            })
            .collect()
    }

    /// Download remote file references into the save directory.
    ///
    /// File-kind outputs deserialized into `http(s)` URLs are fetched with
    /// the context credential and replaced by local paths. Other outputs
    /// pass through untouched.
    pub async fn resolve_artifacts(
        &self,
        http: &reqwest::Client,
        values: Vec<Value>,
        ctx: &DeserializeContext,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(values.len());
        for (kind, value) in self.output_kinds.iter().zip(values) {
            if *kind == ComponentKind::File {
                out.push(download_value(http, value, ctx).await?);
            } else {
                out.push(value);
            }
        }
        Ok(out)
    }

    /// Drop outputs whose kind is skipped. Runs before singleton reduction.
    pub fn remove_skipped(&self, values: Vec<Value>) -> Vec<Value> {
        self.output_kinds
            .iter()
            .zip(values)
            .filter(|(kind, _)| !kind.is_skipped())
            .map(|(_, value)| value)
            .collect()
    }

    /// Unwrap a one-element output list into the bare value.
    pub fn reduce_singleton(mut values: Vec<Value>) -> Value {
        if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        }
    }
}

/// The fixed post-processing chain applied to every raw output tuple.
///
/// Order matters: decode, resolve remote artifacts, drop skipped outputs,
/// then unwrap a singleton. Partial (streamed) tuples and the final tuple
/// go through the same chain.
pub struct OutputPipeline<'a> {
    pub http: &'a reqwest::Client,
    pub serializers: &'a SerializerSet,
    pub ctx: &'a DeserializeContext,
}

impl OutputPipeline<'_> {
    pub async fn process(&self, data: Vec<Value>) -> Result<Value> {
        let decoded = self.serializers.deserialize(&data, self.ctx)?;
        let resolved = self
            .serializers
            .resolve_artifacts(self.http, decoded, self.ctx)
            .await?;
        let kept = self.serializers.remove_skipped(resolved);
        Ok(SerializerSet::reduce_singleton(kept))
    }
}

async fn download_value(
    http: &reqwest::Client,
    value: Value,
    ctx: &DeserializeContext,
) -> Result<Value> {
    match value {
        Value::String(url) if url.starts_with("http://") || url.starts_with("https://") => {
            let mut req = http.get(&url);
            if let Some(token) = &ctx.auth_token {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(ClientError::Transport(format!(
                    "artifact download failed with {} for {url}",
                    resp.status()
                )));
            }
            let bytes = resp.bytes().await?;

            let base = url::Url::parse(&url)
                .ok()
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|s| s.last().map(|p| p.to_string()))
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "artifact".to_string());
            let path = ctx
                .save_dir
                .join(format!("{}-{}", uuid::Uuid::new_v4().simple(), base));
            std::fs::create_dir_all(&ctx.save_dir)?;
            std::fs::write(&path, &bytes)?;
            Ok(Value::String(path.to_string_lossy().into_owned()))
        }
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(Box::pin(download_value(http, item, ctx)).await?);
            }
            Ok(Value::Array(resolved))
        }
        other => Ok(other),
    }
}
