//! Strategic manifest merging
//!
//! Patch payloads are merged into the previous manifest with Kubernetes
//! strategic-merge semantics: maps merge recursively (null deletes a key),
//! lists merge by a per-field merge key when the registry knows one and are
//! replaced wholesale otherwise. `$patch: delete` entries remove the
//! matching element; `$patch: replace` replaces a map wholesale.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Directive key inside strategic merge patches
const PATCH_DIRECTIVE: &str = "$patch";

/// Registry of list-merge keys, indexed by kind and field path
///
/// Field paths are dotted from the manifest root without indices
/// (`spec.containers.env`). Keys under the `*` kind apply to every kind.
#[derive(Debug, Clone)]
pub struct MergeConfigRegistry {
    keys: HashMap<String, HashMap<String, String>>,
}

impl Default for MergeConfigRegistry {
    fn default() -> Self {
        let mut registry = Self {
            keys: HashMap::new(),
        };
        // Applies to every kind.
        registry.register("*", "metadata.ownerReferences", "uid");
        registry.register("*", "metadata.finalizers", "");
        registry.register("*", "status.conditions", "type");

        registry.register("pod", "spec.containers", "name");
        registry.register("pod", "spec.initContainers", "name");
        registry.register("pod", "spec.volumes", "name");
        registry.register("pod", "spec.tolerations", "key");
        registry.register("pod", "spec.containers.env", "name");
        registry.register("pod", "spec.containers.ports", "containerPort");
        registry.register("pod", "spec.containers.volumeMounts", "mountPath");
        registry.register("pod", "spec.initContainers.env", "name");
        registry.register("pod", "spec.initContainers.volumeMounts", "mountPath");
        registry.register("pod", "status.containerStatuses", "name");
        registry.register("pod", "status.initContainerStatuses", "name");

        registry.register("service", "spec.ports", "port");
        registry.register("node", "status.conditions", "type");
        registry.register("node", "spec.taints", "key");
        registry
    }
}

impl MergeConfigRegistry {
    /// Registry with the built-in core defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the merge key for `field_path` on `kind` (`*` for any kind)
    pub fn register(&mut self, kind: &str, field_path: &str, merge_key: &str) {
        self.keys
            .entry(kind.to_ascii_lowercase())
            .or_default()
            .insert(field_path.to_string(), merge_key.to_string());
    }

    /// Merge key for `field_path` on `kind`, falling back to `*`
    #[must_use]
    pub fn merge_key(&self, kind: &str, field_path: &str) -> Option<&str> {
        let specific = self
            .keys
            .get(&kind.to_ascii_lowercase())
            .and_then(|m| m.get(field_path));
        let key = match specific {
            Some(key) => key,
            None => self.keys.get("*")?.get(field_path)?,
        };
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Apply `patch` to `base` with strategic-merge semantics for `kind`
    #[must_use]
    pub fn strategic_merge(&self, base: &Value, patch: &Value, kind: &str) -> Value {
        self.merge_at(base, patch, kind, "")
    }

    fn merge_at(&self, base: &Value, patch: &Value, kind: &str, path: &str) -> Value {
        match (base, patch) {
            (Value::Object(base_map), Value::Object(patch_map)) => {
                if patch_map.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some("replace") {
                    let mut replaced = patch_map.clone();
                    replaced.remove(PATCH_DIRECTIVE);
                    return Value::Object(replaced);
                }
                let mut merged = base_map.clone();
                for (key, patch_value) in patch_map {
                    if key == PATCH_DIRECTIVE {
                        continue;
                    }
                    if patch_value.is_null() {
                        merged.remove(key);
                        continue;
                    }
                    let child_path = join_path(path, key);
                    let next = match merged.get(key) {
                        Some(existing) => self.merge_at(existing, patch_value, kind, &child_path),
                        None => patch_value.clone(),
                    };
                    merged.insert(key.clone(), next);
                }
                Value::Object(merged)
            }
            (Value::Array(base_items), Value::Array(patch_items)) => {
                match self.merge_key(kind, path) {
                    Some(merge_key) => Value::Array(self.merge_list(
                        base_items,
                        patch_items,
                        kind,
                        path,
                        merge_key,
                    )),
                    // No merge key: the patch replaces the list.
                    None => Value::Array(patch_items.clone()),
                }
            }
            (_, patch_value) => patch_value.clone(),
        }
    }

    fn merge_list(
        &self,
        base_items: &[Value],
        patch_items: &[Value],
        kind: &str,
        path: &str,
        merge_key: &str,
    ) -> Vec<Value> {
        let mut merged: Vec<Value> = base_items.to_vec();
        for patch_item in patch_items {
            let key_value = patch_item.get(merge_key);
            let directive = patch_item.get(PATCH_DIRECTIVE).and_then(Value::as_str);
            let position = key_value.and_then(|kv| {
                merged
                    .iter()
                    .position(|existing| existing.get(merge_key) == Some(kv))
            });

            if directive == Some("delete") {
                if let Some(index) = position {
                    merged.remove(index);
                }
                continue;
            }
            match position {
                Some(index) => {
                    merged[index] = self.merge_at(&merged[index], patch_item, kind, path);
                }
                None => merged.push(patch_item.clone()),
            }
        }
        merged
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Remove protobuf-JSON type markers from the top level of a payload
#[must_use]
pub(crate) fn strip_type_marker(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut stripped = map.clone();
            stripped.remove("@type");
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}
