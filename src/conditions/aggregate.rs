//! Readiness aggregation over the children of a resource.

use super::{reasons, Condition, ConditionStatus, READY};
use crate::crd::InventoryEntry;
use std::collections::BTreeMap;

/// Derive the parent's Ready condition from the observed children
///
/// Children are scanned kind-major: every group's member of the first kind in
/// `kind_order`, then every group's member of the next kind, and so on. Within
/// a kind, groups are visited in key order. Kinds absent from `kind_order` are
/// scanned last.
///
/// The first child reporting `False` decides the result. Otherwise any
/// `Unknown` child makes the result `Unknown`. Only when every child is `True`
/// is the parent `True`.
#[must_use]
pub fn aggregate_ready(
    inventory: &BTreeMap<String, Vec<InventoryEntry>>,
    kind_order: &[&str],
) -> Condition {
    let rank = |kind: &str| {
        kind_order
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(kind_order.len())
    };

    let mut members: Vec<(usize, &str, &InventoryEntry)> = inventory
        .iter()
        .flat_map(|(key, entries)| entries.iter().map(move |entry| (key.as_str(), entry)))
        .map(|(key, entry)| (rank(&entry.kind), key, entry))
        .collect();
    // Stable: members of equal kind keep group-key order
    members.sort_by_key(|(rank, _, _)| *rank);

    if let Some((_, key, failed)) = members
        .iter()
        .find(|(_, _, entry)| entry.ready == ConditionStatus::False)
    {
        let reason = failed
            .reason
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| reasons::DEPENDENCY_NOT_READY.to_string());
        return Condition::new(
            READY,
            ConditionStatus::False,
            reason,
            format!(
                "{} {} (group {key}) is not ready: {}",
                failed.kind, failed.name, failed.message
            ),
        );
    }

    if let Some((_, key, pending)) = members
        .iter()
        .find(|(_, _, entry)| entry.ready == ConditionStatus::Unknown)
    {
        return Condition::new(
            READY,
            ConditionStatus::Unknown,
            reasons::PROGRESSING,
            format!(
                "waiting for {} {} (group {key})",
                pending.kind, pending.name
            ),
        );
    }

    Condition::new(
        READY,
        ConditionStatus::True,
        reasons::SUCCEEDED,
        format!("{} managed objects are ready", members.len()),
    )
}
