//! Stage 2: timeline grouping
//!
//! A chain of deciders assigns each parsed log its timeline path. A decider
//! returning `None` passes the log to the next one; logs no decider claims
//! are counted and dropped. After grouping, delete-collection entries fan
//! out as synthesized deletes onto the resource-layer timelines under their
//! namespace.

use crate::parsed::ParsedAuditLog;
use indexmap::IndexMap;
use khi_history::{ResourcePath, RevisionVerb};
use tracing::debug;

/// Depth (number of `#` separators) of a resource-layer path
const RESOURCE_LAYER_DEPTH: usize = 3;

/// One step of the grouping chain
pub trait GroupDecider: Send + Sync {
    /// Timeline path for `parsed`, or `None` to pass to the next decider
    fn decide(&self, parsed: &ParsedAuditLog) -> Option<ResourcePath>;
}

/// Groups subresource operations
///
/// Tries to learn the payload's resource type from the response, then the
/// request. A payload whose kind matches the parent's singular kind means
/// the audit captured the parent manifest, so the log groups at the parent
/// resource; a distinct kind groups at the subresource. A generic
/// `v1/Status` payload is uninformative and falls through. When neither
/// payload helps, `status` defaults to the parent and every other
/// subresource to its own timeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubresourceGroupDecider;

impl GroupDecider for SubresourceGroupDecider {
    fn decide(&self, parsed: &ParsedAuditLog) -> Option<ResourcePath> {
        let op = &parsed.operation;
        if op.subresource.is_empty() || op.name.is_empty() {
            return None;
        }

        for payload in [parsed.response.as_ref(), parsed.request.as_ref()] {
            let Some((api_version, kind)) = ParsedAuditLog::payload_kind(payload) else {
                continue;
            };
            if kind == "Status" && (api_version.is_empty() || api_version == "v1") {
                continue;
            }
            return if kind.eq_ignore_ascii_case(&op.singular_kind) {
                Some(op.resource_path())
            } else {
                Some(op.subresource_path())
            };
        }

        if op.subresource == "status" {
            Some(op.resource_path())
        } else {
            Some(op.subresource_path())
        }
    }
}

/// Derives the path directly from the operation
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultGroupDecider;

impl GroupDecider for DefaultGroupDecider {
    fn decide(&self, parsed: &ParsedAuditLog) -> Option<ResourcePath> {
        let op = &parsed.operation;
        if !op.subresource.is_empty() && !op.name.is_empty() {
            return Some(op.subresource_path());
        }
        if !op.name.is_empty() {
            return Some(op.resource_path());
        }
        // Collection operations group at the namespace layer.
        Some(op.namespace_path())
    }
}

/// Result of the grouping stage
#[derive(Debug, Default, Clone)]
pub struct GroupedLogs {
    /// Logs per timeline path, each sorted ascending by timestamp
    pub groups: IndexMap<ResourcePath, Vec<ParsedAuditLog>>,
    /// Logs no decider claimed
    pub undecided: usize,
}

impl GroupedLogs {
    /// Total number of grouped logs
    #[must_use]
    pub fn log_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// The grouping chain
pub struct TimelineGrouper {
    deciders: Vec<Box<dyn GroupDecider>>,
}

impl Default for TimelineGrouper {
    fn default() -> Self {
        Self {
            deciders: vec![
                Box::new(SubresourceGroupDecider),
                Box::new(DefaultGroupDecider),
            ],
        }
    }
}

impl TimelineGrouper {
    /// Grouper with the default decider chain
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Group `logs`, then apply delete-collection fan-out and re-sort
    #[must_use]
    pub fn group(&self, logs: Vec<ParsedAuditLog>) -> GroupedLogs {
        let mut grouped = GroupedLogs::default();
        for parsed in logs {
            let path = self
                .deciders
                .iter()
                .find_map(|decider| decider.decide(&parsed));
            match path {
                Some(path) => grouped.groups.entry(path).or_default().push(parsed),
                None => grouped.undecided += 1,
            }
        }
        for group in grouped.groups.values_mut() {
            group.sort_by_key(|p| p.timestamp);
        }
        fan_out_delete_collections(&mut grouped.groups);
        debug!(
            groups = grouped.groups.len(),
            undecided = grouped.undecided,
            "grouping stage finished"
        );
        grouped
    }
}

/// Synthesize per-resource deletes for every delete-collection entry
///
/// Fan-out applies only at the resource-name layer: targets are timelines
/// exactly one layer under the collection's namespace path. Timelines whose
/// first log is after the delete-collection are skipped (the resource did
/// not yet exist). Affected groups are re-sorted ascending by timestamp.
pub(crate) fn fan_out_delete_collections(
    groups: &mut IndexMap<ResourcePath, Vec<ParsedAuditLog>>,
) {
    let collections: Vec<(ResourcePath, ParsedAuditLog)> = groups
        .iter()
        .flat_map(|(path, logs)| {
            logs.iter()
                .filter(|l| {
                    l.operation.verb == RevisionVerb::DeleteCollection
                        && l.operation.is_namespaced()
                        && !l.generated_from_delete_collection
                })
                .map(|l| (path.clone(), l.clone()))
        })
        .collect();

    for (collection_path, collection_log) in collections {
        let targets: Vec<ResourcePath> = groups
            .keys()
            .filter(|candidate| {
                candidate.depth() == RESOURCE_LAYER_DEPTH
                    && candidate.is_strictly_under(&collection_path)
            })
            .cloned()
            .collect();

        for target in targets {
            let Some(target_logs) = groups.get_mut(&target) else {
                continue;
            };
            // A timeline born after the delete-collection never held one of
            // the deleted resources.
            match target_logs.first() {
                Some(first) if first.timestamp > collection_log.timestamp => continue,
                None => continue,
                _ => {}
            }

            let mut synthesized = collection_log.clone();
            synthesized.generated_from_delete_collection = true;
            synthesized.operation.verb = RevisionVerb::Delete;
            synthesized.operation.name = target.leaf().to_string();
            target_logs.push(synthesized);
            target_logs.sort_by_key(|p| p.timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{AuditLogExtractor, JsonAuditExtractor};
    use khi_log::LogId;
    use khi_test_utils::AuditLogBuilder;
    use serde_json::json;

    fn parse(builder: AuditLogBuilder, id: usize) -> ParsedAuditLog {
        JsonAuditExtractor
            .extract(LogId(id), &builder.build_arc())
            .unwrap()
    }

    #[test]
    fn binding_with_binding_response_groups_at_subresource() {
        let parsed = parse(
            AuditLogBuilder::new("create", "pods", "default", "foo")
                .subresource("binding")
                .response(json!({"apiVersion": "v1", "kind": "Binding"})),
            0,
        );
        let grouped = TimelineGrouper::new().group(vec![parsed]);
        assert!(grouped
            .groups
            .contains_key(&ResourcePath::from("core/v1#pod#default#foo#binding")));
    }

    #[test]
    fn status_response_falls_through_to_request() {
        let parsed = parse(
            AuditLogBuilder::new("create", "pods", "default", "foo")
                .subresource("binding")
                .response(json!({"apiVersion": "v1", "kind": "Status"}))
                .request(json!({"apiVersion": "v1", "kind": "Binding"})),
            0,
        );
        let grouped = TimelineGrouper::new().group(vec![parsed]);
        assert!(grouped
            .groups
            .contains_key(&ResourcePath::from("core/v1#pod#default#foo#binding")));
    }

    #[test]
    fn parent_kind_response_groups_at_parent() {
        let parsed = parse(
            AuditLogBuilder::new("patch", "pods", "default", "foo")
                .subresource("status")
                .response(json!({"apiVersion": "v1", "kind": "Pod"})),
            0,
        );
        let grouped = TimelineGrouper::new().group(vec![parsed]);
        assert!(grouped
            .groups
            .contains_key(&ResourcePath::from("core/v1#pod#default#foo")));
    }

    #[test]
    fn uninformative_status_subresource_defaults_to_parent() {
        let parsed = parse(
            AuditLogBuilder::new("patch", "pods", "default", "foo").subresource("status"),
            0,
        );
        let grouped = TimelineGrouper::new().group(vec![parsed]);
        assert!(grouped
            .groups
            .contains_key(&ResourcePath::from("core/v1#pod#default#foo")));
    }

    #[test]
    fn plain_resource_operations_group_at_resource() {
        let parsed = parse(AuditLogBuilder::new("create", "pods", "default", "foo"), 0);
        let grouped = TimelineGrouper::new().group(vec![parsed]);
        assert!(grouped
            .groups
            .contains_key(&ResourcePath::from("core/v1#pod#default#foo")));
    }

    #[test]
    fn delete_collection_fans_out_to_existing_children() {
        let existing = parse(
            AuditLogBuilder::new("create", "pods", "default", "foo").at("2024-04-01T09:00:00Z"),
            0,
        );
        let newborn = parse(
            AuditLogBuilder::new("create", "pods", "default", "late").at("2024-04-01T11:00:00Z"),
            1,
        );
        let collection = parse(
            AuditLogBuilder::new("deletecollection", "pods", "default", "")
                .at("2024-04-01T10:00:00Z"),
            2,
        );

        let grouped = TimelineGrouper::new().group(vec![existing, newborn, collection]);

        let foo = &grouped.groups[&ResourcePath::from("core/v1#pod#default#foo")];
        assert_eq!(foo.len(), 2);
        assert!(foo[1].generated_from_delete_collection);
        assert_eq!(foo[1].operation.verb, RevisionVerb::Delete);
        assert_eq!(foo[1].operation.name, "foo");
        // Sorted ascending after fan-out.
        assert!(foo[0].timestamp < foo[1].timestamp);

        // The timeline born after the delete-collection is untouched.
        let late = &grouped.groups[&ResourcePath::from("core/v1#pod#default#late")];
        assert_eq!(late.len(), 1);
    }

    #[test]
    fn fan_out_skips_subresource_layers() {
        let binding = parse(
            AuditLogBuilder::new("create", "pods", "default", "foo")
                .at("2024-04-01T09:00:00Z")
                .subresource("binding")
                .response(json!({"apiVersion": "v1", "kind": "Binding"})),
            0,
        );
        let collection = parse(
            AuditLogBuilder::new("deletecollection", "pods", "default", "")
                .at("2024-04-01T10:00:00Z"),
            1,
        );

        let grouped = TimelineGrouper::new().group(vec![binding, collection]);
        let sub = &grouped.groups[&ResourcePath::from("core/v1#pod#default#foo#binding")];
        assert_eq!(sub.len(), 1);
    }
}
