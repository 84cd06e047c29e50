//! File codec: local-path wrapping on the way out, artifact resolution on
//! the way in.
//!
//! Outbound file values are expected to have passed through the upload
//! indirection already, so `serialize` only wraps the (local or
//! server-assigned) reference into the wire shape. Inbound values carry
//! either inline base64 data, which is materialized into the context's save
//! directory here, or a server file reference, which is absolutized into a
//! download URL and fetched later by the serializer layer.

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ComponentCodec, DeserializeContext};
use crate::error::{ClientError, Result};

/// Wire shape of a file-bearing value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_name: Option<String>,
}

impl FileReference {
    /// Reference to a file known to the server (uploaded or server-local).
    pub fn remote(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
            is_file: true,
            orig_name: None,
        }
    }
}

/// Codec for file-like components (file, image, audio, video).
pub struct FileCodec;

impl FileCodec {
    /// Build the download URL for a server file reference.
    fn absolutize(name: &str, root_url: &str) -> String {
        if name.starts_with("http://") || name.starts_with("https://") {
            name.to_string()
        } else {
            format!("{}/file={}", root_url.trim_end_matches('/'), name)
        }
    }

    /// Write inline base64 payload into the save directory.
    fn materialize(reference: &FileReference, ctx: &DeserializeContext) -> Result<Value> {
        let data = reference.data.as_deref().unwrap_or_default();
        // Inline payloads may arrive as data URLs; strip the prefix.
        let encoded = data.rsplit_once("base64,").map(|(_, b)| b).unwrap_or(data);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ClientError::MalformedResponse(format!("bad inline file data: {e}")))?;

        let base = Path::new(
            reference
                .orig_name
                .as_deref()
                .unwrap_or(reference.name.as_str()),
        )
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
        let path = ctx
            .save_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4().simple(), base));

        std::fs::create_dir_all(&ctx.save_dir)?;
        std::fs::write(&path, bytes)?;
        Ok(Value::String(path.to_string_lossy().into_owned()))
    }
}

impl ComponentCodec for FileCodec {
    /// Wrap a file reference into its wire shape.
    ///
    /// Accepts a bare string (path or server reference), an already-shaped
    /// object, or a list of either for multi-file parameters.
    fn serialize(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => Ok(serde_json::to_value(FileReference::remote(s))?),
            Value::Array(items) => {
                let wrapped: Result<Vec<Value>> =
                    items.iter().map(|v| self.serialize(v)).collect();
                Ok(Value::Array(wrapped?))
            }
            Value::Object(_) => Ok(value.clone()),
            other => Err(ClientError::MalformedResponse(format!(
                "file parameter must be a path or reference, got {other}"
            ))),
        }
    }

    /// Resolve a wire value into a local artifact path or a download URL.
    fn deserialize(&self, value: &Value, ctx: &DeserializeContext) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => Ok(Value::String(Self::absolutize(s, &ctx.root_url))),
            Value::Array(items) => {
                let resolved: Result<Vec<Value>> =
                    items.iter().map(|v| self.deserialize(v, ctx)).collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(_) => {
                let reference: FileReference = serde_json::from_value(value.clone())?;
                if reference.data.is_some() {
                    Self::materialize(&reference, ctx)
                } else {
                    Ok(Value::String(Self::absolutize(
                        &reference.name,
                        &ctx.root_url,
                    )))
                }
            }
            other => Err(ClientError::MalformedResponse(format!(
                "unexpected file output shape: {other}"
            ))),
        }
    }

    fn uploads_files(&self) -> bool {
        true
    }
}
