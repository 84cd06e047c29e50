//! Codec module - per-component serialization for invocation payloads.
//!
//! Each parameter of an endpoint resolves to one [`ComponentKind`], a closed
//! enum, and every kind maps to a `&'static dyn ComponentCodec` through
//! [`codec_for`]. The mapping is a static match, populated at compile time;
//! there is no runtime registration.
//!
//! Codecs are polymorphic over exactly two capabilities, `serialize` and
//! `deserialize`. File-bearing kinds additionally opt into the upload
//! indirection via [`ComponentCodec::uploads_files`].

mod file;
mod value;

use std::path::PathBuf;

use serde_json::Value;

use crate::error::{ClientError, Result};

pub use file::{FileCodec, FileReference};
pub use value::{BooleanCodec, JsonCodec, NumberCodec, StateCodec, TextCodec};

/// Closed set of component kinds the client can encode or decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Text,
    Number,
    Boolean,
    Json,
    File,
    /// Server-tracked placeholder; never sent and dropped from outputs.
    State,
}

impl ComponentKind {
    /// Resolve a kind from a component type tag.
    pub fn from_type_tag(tag: &str) -> Result<ComponentKind> {
        let kind = match tag {
            "textbox" | "dropdown" | "radio" | "label" | "markdown" | "html" | "code" => {
                ComponentKind::Text
            }
            "number" | "slider" => ComponentKind::Number,
            "checkbox" => ComponentKind::Boolean,
            "json" | "dataframe" => ComponentKind::Json,
            "file" | "image" | "audio" | "video" | "model3d" => ComponentKind::File,
            "state" | "variable" => ComponentKind::State,
            other => return Err(ClientError::UnknownComponent(other.to_string())),
        };
        Ok(kind)
    }

    /// Resolve a kind from an explicit serializer name.
    pub fn from_serializer_name(name: &str) -> Result<ComponentKind> {
        let kind = match name {
            "StringSerializable" => ComponentKind::Text,
            "NumberSerializable" => ComponentKind::Number,
            "BooleanSerializable" => ComponentKind::Boolean,
            "JSONSerializable" => ComponentKind::Json,
            "FileSerializable" | "ImgSerializable" => ComponentKind::File,
            "StateSerializable" => ComponentKind::State,
            other => return Err(ClientError::UnknownSerializer(other.to_string())),
        };
        Ok(kind)
    }

    /// Whether outputs of this kind are dropped before results surface.
    pub fn is_skipped(&self) -> bool {
        matches!(self, ComponentKind::State)
    }
}

/// Context for resolving wire values back into local artifacts.
#[derive(Debug, Clone)]
pub struct DeserializeContext {
    /// Directory where downloaded or inline file payloads land.
    pub save_dir: PathBuf,
    /// Root URL of the served app, for absolutizing file references.
    pub root_url: String,
    /// Bearer credential attached to artifact downloads.
    pub auth_token: Option<String>,
}

impl DeserializeContext {
    pub fn new(save_dir: impl Into<PathBuf>, root_url: impl Into<String>) -> Self {
        Self {
            save_dir: save_dir.into(),
            root_url: root_url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// The `{serialize, deserialize}` capability set every codec implements.
pub trait ComponentCodec: Send + Sync {
    /// Encode a caller-supplied value into its wire form.
    fn serialize(&self, value: &Value) -> Result<Value>;

    /// Decode a wire value back into its caller-facing form.
    fn deserialize(&self, value: &Value, ctx: &DeserializeContext) -> Result<Value>;

    /// Whether values of this codec pass through the upload indirection.
    fn uploads_files(&self) -> bool {
        false
    }
}

static TEXT: TextCodec = TextCodec;
static NUMBER: NumberCodec = NumberCodec;
static BOOLEAN: BooleanCodec = BooleanCodec;
static JSON: JsonCodec = JsonCodec;
static FILE: FileCodec = FileCodec;
static STATE: StateCodec = StateCodec;

/// Static mapping from component kind to its codec.
pub fn codec_for(kind: ComponentKind) -> &'static dyn ComponentCodec {
    match kind {
        ComponentKind::Text => &TEXT,
        ComponentKind::Number => &NUMBER,
        ComponentKind::Boolean => &BOOLEAN,
        ComponentKind::Json => &JSON,
        ComponentKind::File => &FILE,
        ComponentKind::State => &STATE,
    }
}
