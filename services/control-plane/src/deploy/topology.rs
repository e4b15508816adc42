//! Structured editing of a deployed compose document.

use serde_yaml::{Mapping, Value};

use crate::error::OrchestratorError;

const SERVICES: &str = "services";

/// A parsed compose document.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    doc: Mapping,
}

impl Topology {
    pub fn parse(text: &str) -> Result<Self, OrchestratorError> {
        match serde_yaml::from_str::<Value>(text) {
            Ok(Value::Mapping(doc)) => Ok(Self { doc }),
            Ok(_) => Err(OrchestratorError::Topology("document is not a mapping".into())),
            Err(e) => Err(OrchestratorError::Topology(e.to_string())),
        }
    }

    fn services_map(&self) -> Option<&Mapping> {
        self.doc.get(SERVICES).and_then(Value::as_mapping)
    }

    /// Service names in document order.
    pub fn services(&self) -> Vec<String> {
        self.services_map()
            .map(|services| {
                services
                    .keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services_map().is_some_and(|s| s.contains_key(name))
    }

    /// Insert `definition` under `name`. Returns false if it already exists.
    pub fn add_service(&mut self, name: &str, definition: Value) -> Result<bool, OrchestratorError> {
        if self.has_service(name) {
            return Ok(false);
        }
        let services = self
            .doc
            .entry(Value::String(SERVICES.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if services.is_null() {
            *services = Value::Mapping(Mapping::new());
        }
        match services.as_mapping_mut() {
            Some(map) => {
                map.insert(Value::String(name.to_string()), definition);
                Ok(true)
            }
            None => Err(OrchestratorError::Topology("`services` is not a mapping".into())),
        }
    }

    /// Returns false if the service was not present.
    pub fn remove_service(&mut self, name: &str) -> bool {
        self.doc
            .get_mut(SERVICES)
            .and_then(Value::as_mapping_mut)
            .and_then(|services| services.shift_remove(name))
            .is_some()
    }

    pub fn render(&self) -> Result<String, OrchestratorError> {
        serde_yaml::to_string(&self.doc).map_err(|e| OrchestratorError::Topology(e.to_string()))
    }
}

/// Parse a single YAML node, such as a service definition.
pub fn parse_node(text: &str) -> Result<Value, OrchestratorError> {
    serde_yaml::from_str(text).map_err(|e| OrchestratorError::Topology(e.to_string()))
}
