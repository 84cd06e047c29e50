//! Endpoint registry: resolves configuration into addressable endpoints.
//!
//! Built once from the parsed [`AppConfig`] at client construction and
//! read-only afterwards, so any thread may resolve endpoints without
//! locking.

use std::collections::HashMap;

use crate::codec::ComponentKind;
use crate::config::{AppConfig, Dependency};
use crate::error::{ClientError, Result};

/// Which driver carries an endpoint's invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// One POST, one response.
    Simple,
    /// Persistent connection speaking the queue event protocol.
    Streaming,
}

/// How callers address an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiTarget {
    Name(String),
    Index(u32),
}

impl From<&str> for ApiTarget {
    fn from(name: &str) -> Self {
        ApiTarget::Name(name.to_string())
    }
}

impl From<u32> for ApiTarget {
    fn from(index: u32) -> Self {
        ApiTarget::Index(index)
    }
}

/// Resolved view of one dependency.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub fn_index: u32,
    pub api_name: Option<String>,
    /// Per-parameter kinds, in declared order.
    pub input_kinds: Vec<ComponentKind>,
    pub output_kinds: Vec<ComponentKind>,
    pub transport: TransportKind,
}

/// Immutable name/index lookup over all resolvable endpoints.
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    by_name: HashMap<String, usize>,
    by_index: HashMap<u32, usize>,
}

impl EndpointRegistry {
    /// Resolve every backend dependency of the config into an endpoint.
    ///
    /// Fails on the first component whose type tag or explicit serializer
    /// name cannot be resolved, before any invocation is possible.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut endpoints = Vec::new();
        let mut by_name = HashMap::new();
        let mut by_index = HashMap::new();

        for (index, dep) in config.dependencies.iter().enumerate() {
            if !dep.backend_fn {
                continue;
            }
            let fn_index = index as u32;
            let endpoint = Endpoint {
                fn_index,
                api_name: dep.api_name.clone(),
                input_kinds: resolve_kinds(config, &dep.inputs)?,
                output_kinds: resolve_kinds(config, &dep.outputs)?,
                transport: decide_transport(config, dep),
            };

            let slot = endpoints.len();
            if let Some(name) = &endpoint.api_name {
                by_name.insert(name.clone(), slot);
            }
            by_index.insert(fn_index, slot);
            endpoints.push(endpoint);
        }

        Ok(Self {
            endpoints,
            by_name,
            by_index,
        })
    }

    /// Look up an endpoint by api name or function index.
    pub fn resolve(&self, target: &ApiTarget) -> Result<&Endpoint> {
        let slot = match target {
            ApiTarget::Name(name) => self.by_name.get(name).copied(),
            ApiTarget::Index(index) => self.by_index.get(index).copied(),
        };
        slot.map(|i| &self.endpoints[i]).ok_or_else(|| {
            ClientError::UnknownEndpoint(match target {
                ApiTarget::Name(name) => name.clone(),
                ApiTarget::Index(index) => format!("fn_index {index}"),
            })
        })
    }

    /// All resolvable endpoints, in declaration order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

/// Map component ids to kinds, preferring the explicit serializer name.
fn resolve_kinds(config: &AppConfig, ids: &[u32]) -> Result<Vec<ComponentKind>> {
    ids.iter()
        .map(|id| {
            let component = config
                .component(*id)
                .ok_or_else(|| ClientError::UnknownComponent(format!("component id {id}")))?;
            match &component.serializer {
                Some(name) => ComponentKind::from_serializer_name(name),
                None => ComponentKind::from_type_tag(&component.component_type),
            }
        })
        .collect()
}

/// Pick the transport for one dependency.
///
/// Pure function of the app-level queue flag, the protocol-version
/// threshold, and the dependency's own queue override.
pub fn decide_transport(config: &AppConfig, dep: &Dependency) -> TransportKind {
    let queue_capable = config.major_version() >= crate::config::MIN_SUPPORTED_MAJOR;
    let queued = dep.queue.unwrap_or(config.enable_queue);
    if queue_capable && queued {
        TransportKind::Streaming
    } else {
        TransportKind::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::parse(
            r#"{
            "version": "3.5.0",
            "enable_queue": true,
            "dependencies": [
                {"inputs": [1, 2], "outputs": [3], "api_name": "concat", "backend_fn": true},
                {"inputs": [4], "outputs": [4], "backend_fn": true, "queue": false},
                {"inputs": [], "outputs": [], "backend_fn": false}
            ],
            "components": [
                {"id": 1, "type": "textbox"},
                {"id": 2, "type": "textbox"},
                {"id": 3, "type": "textbox"},
                {"id": 4, "type": "number"}
            ]
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_by_name_and_index() {
        let registry = EndpointRegistry::new(&config()).unwrap();
        assert_eq!(registry.endpoints().len(), 2);

        let ep = registry.resolve(&"concat".into()).unwrap();
        assert_eq!(ep.fn_index, 0);
        assert_eq!(ep.input_kinds, vec![ComponentKind::Text, ComponentKind::Text]);

        let ep = registry.resolve(&ApiTarget::Index(1)).unwrap();
        assert!(ep.api_name.is_none());
        assert_eq!(ep.input_kinds, vec![ComponentKind::Number]);
    }

    #[test]
    fn test_unknown_endpoint() {
        let registry = EndpointRegistry::new(&config()).unwrap();
        assert!(matches!(
            registry.resolve(&"nope".into()),
            Err(ClientError::UnknownEndpoint(_))
        ));
        // fn_index 2 exists in the config but is not a backend function.
        assert!(registry.resolve(&ApiTarget::Index(2)).is_err());
    }

    #[test]
    fn test_transport_decision() {
        let registry = EndpointRegistry::new(&config()).unwrap();
        // App-level queue on, no per-dependency override.
        assert_eq!(
            registry.resolve(&"concat".into()).unwrap().transport,
            TransportKind::Streaming
        );
        // Per-dependency queue=false wins over the app flag.
        assert_eq!(
            registry.resolve(&ApiTarget::Index(1)).unwrap().transport,
            TransportKind::Simple
        );
    }

    #[test]
    fn test_transport_decision_queue_disabled() {
        let mut cfg = config();
        cfg.enable_queue = false;
        assert_eq!(
            decide_transport(&cfg, &cfg.dependencies[0]),
            TransportKind::Simple
        );
        // Explicit per-dependency opt-in still streams.
        let mut dep = cfg.dependencies[0].clone();
        dep.queue = Some(true);
        assert_eq!(decide_transport(&cfg, &dep), TransportKind::Streaming);
    }

    #[test]
    fn test_unresolvable_component_fails_construction() {
        let cfg = AppConfig::parse(
            r#"{
            "version": "3.0.0",
            "dependencies": [{"inputs": [1], "outputs": [], "backend_fn": true}],
            "components": [{"id": 1, "type": "hologram"}]
        }"#,
        )
        .unwrap();
        assert!(matches!(
            EndpointRegistry::new(&cfg),
            Err(ClientError::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_explicit_serializer_overrides_type_tag() {
        let cfg = AppConfig::parse(
            r#"{
            "version": "3.0.0",
            "dependencies": [{"inputs": [1], "outputs": [], "backend_fn": true}],
            "components": [{"id": 1, "type": "hologram", "serializer": "FileSerializable"}]
        }"#,
        )
        .unwrap();
        let registry = EndpointRegistry::new(&cfg).unwrap();
        assert_eq!(
            registry.resolve(&ApiTarget::Index(0)).unwrap().input_kinds,
            vec![ComponentKind::File]
        );
    }
}
