//! Input merger (component B, §4.2).
//!
//! Applies a per-edge merge strategy to the outputs of a task's
//! upstream nodes (in edge-declaration order) to produce the task's
//! next `input`. `CUSTOM` strategies are resolved through a
//! [`MapperRegistry`] rather than the source's `importlib`-based
//! dynamic lookup, per the design notes' "statically-typed target"
//! guidance.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;

/// Strategy governing how a downstream task's input is derived from
/// its upstream outputs. The first incoming edge's strategy governs;
/// all edges into the same task must agree (checked by the graph at
/// construction, see [`crate::model::JobGraph`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    Replace,
    MergeDict,
    MergeList,
    Custom,
}

/// A named, user-registered merge function for `MergeStrategy::Custom`
/// edges. Registered by application code at startup; edges reference
/// mappers by name, resolved here rather than by dynamic import.
pub type MapperFn = dyn Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync;

#[derive(Clone, Default)]
pub struct MapperRegistry {
    mappers: HashMap<String, Arc<MapperFn>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, mapper: F)
    where
        F: Fn(&[Option<Value>]) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        self.mappers.insert(name.into(), Arc::new(mapper));
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<MapperFn>> {
        self.mappers.get(name).cloned()
    }
}

/// Merge `upstream_outputs` (in edge-declaration order) according to
/// `strategy`. `mapper_name`, when `strategy == Custom`, is resolved
/// against `registry`.
pub fn merge_outputs(
    task_id: Uuid,
    upstream_outputs: &[Option<Value>],
    strategy: MergeStrategy,
    mapper_name: Option<&str>,
    registry: &MapperRegistry,
) -> Result<Option<Value>, EngineError> {
    if upstream_outputs.is_empty() {
        return Ok(None);
    }

    match strategy {
        MergeStrategy::Replace => Ok(upstream_outputs.iter().rev().find_map(|o| o.clone())),

        MergeStrategy::MergeDict => {
            let mut result = serde_json::Map::new();
            for output in upstream_outputs {
                match output {
                    Some(Value::Object(map)) => {
                        for (k, v) in map {
                            result.insert(k.clone(), v.clone());
                        }
                    }
                    Some(other) => {
                        let key = format!("output_{}", result.len());
                        result.insert(key, other.clone());
                    }
                    None => {}
                }
            }
            Ok(Some(Value::Object(result)))
        }

        MergeStrategy::MergeList => {
            let mut result = Vec::new();
            for output in upstream_outputs {
                match output {
                    Some(Value::Array(items)) => result.extend(items.clone()),
                    Some(other) => result.push(other.clone()),
                    None => {}
                }
            }
            Ok(Some(Value::Array(result)))
        }

        MergeStrategy::Custom => {
            let name = mapper_name.ok_or_else(|| EngineError::MergeFailed {
                task_id,
                reason: "CUSTOM merge strategy requires a mapper_config".to_string(),
            })?;
            let mapper = registry.resolve(name).ok_or_else(|| EngineError::UnknownMapper {
                name: name.to_string(),
            })?;
            mapper(upstream_outputs).map_err(|e| EngineError::MergeFailed {
                task_id,
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid() -> Uuid {
        Uuid::nil()
    }

    #[test]
    fn replace_picks_last_non_null() {
        let outputs = vec![Some(json!("a")), None, Some(json!("b"))];
        let registry = MapperRegistry::new();
        let merged = merge_outputs(uid(), &outputs, MergeStrategy::Replace, None, &registry).unwrap();
        assert_eq!(merged, Some(json!("b")));
    }

    #[test]
    fn replace_of_all_null_is_null() {
        let outputs = vec![None];
        let registry = MapperRegistry::new();
        let merged = merge_outputs(uid(), &outputs, MergeStrategy::Replace, None, &registry).unwrap();
        assert_eq!(merged, None);
    }

    #[test]
    fn merge_dict_overrides_with_later_keys() {
        let outputs = vec![Some(json!({"x": 1})), Some(json!({"x": 2, "y": 3}))];
        let registry = MapperRegistry::new();
        let merged = merge_outputs(uid(), &outputs, MergeStrategy::MergeDict, None, &registry).unwrap();
        assert_eq!(merged, Some(json!({"x": 2, "y": 3})));
    }

    #[test]
    fn merge_dict_wraps_non_dict_under_synthetic_key() {
        let outputs = vec![Some(json!({"x": 1})), Some(json!("z"))];
        let registry = MapperRegistry::new();
        let merged = merge_outputs(uid(), &outputs, MergeStrategy::MergeDict, None, &registry).unwrap();
        assert_eq!(merged, Some(json!({"x": 1, "output_1": "z"})));
    }

    #[test]
    fn merge_list_concatenates_and_appends_scalars() {
        let outputs = vec![Some(json!([1, 2])), Some(json!([3])), Some(json!("z"))];
        let registry = MapperRegistry::new();
        let merged = merge_outputs(uid(), &outputs, MergeStrategy::MergeList, None, &registry).unwrap();
        assert_eq!(merged, Some(json!([1, 2, 3, "z"])));
    }

    #[test]
    fn custom_without_mapper_config_fails() {
        let outputs = vec![Some(json!("a"))];
        let registry = MapperRegistry::new();
        let err = merge_outputs(uid(), &outputs, MergeStrategy::Custom, None, &registry).unwrap_err();
        assert!(matches!(err, EngineError::MergeFailed { .. }));
    }

    #[test]
    fn custom_resolves_registered_mapper() {
        let outputs = vec![Some(json!({"k": "a"})), Some(json!({"k": "b"}))];
        let mut registry = MapperRegistry::new();
        registry.register("pick_first", |xs: &[Option<Value>]| Ok(xs[0].clone()));
        let merged = merge_outputs(uid(), &outputs, MergeStrategy::Custom, Some("pick_first"), &registry).unwrap();
        assert_eq!(merged, Some(json!({"k": "a"})));
    }

    #[test]
    fn custom_unregistered_mapper_fails() {
        let outputs = vec![Some(json!("a"))];
        let registry = MapperRegistry::new();
        let err = merge_outputs(uid(), &outputs, MergeStrategy::Custom, Some("missing"), &registry).unwrap_err();
        assert!(matches!(err, EngineError::UnknownMapper { .. }));
    }
}
