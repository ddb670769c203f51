//! Ready condition of a Catalog.

use super::children::DEPENDENCY_ORDER;
use crate::conditions::{self, aggregate_ready, reasons, Condition, ConditionStatus};
use crate::controller::lifecycle::Outcome;
use crate::crd::Catalog;

/// Ready condition for a catalog after its pipeline ran
///
/// A pipeline failure wins. Otherwise readiness is aggregated over the
/// inventory in dependency order.
#[must_use]
pub fn catalog_ready(catalog: &Catalog, outcome: &Outcome) -> Condition {
    if let Outcome::Failed(err) = outcome {
        return Condition::new(
            conditions::READY,
            ConditionStatus::False,
            reasons::RECONCILIATION_FAILED,
            format!("{err:#}"),
        );
    }

    let inventory = catalog
        .status
        .as_ref()
        .map(|status| &status.inventory)
        .filter(|inventory| !inventory.is_empty());

    match inventory {
        Some(inventory) => {
            let order = DEPENDENCY_ORDER.map(|kind| kind.as_str());
            aggregate_ready(inventory, &order)
        }
        None if catalog.spec.sources.is_empty() => Condition::new(
            conditions::READY,
            ConditionStatus::True,
            reasons::NO_SOURCES,
            "no sources declared",
        ),
        None => Condition::new(
            conditions::READY,
            ConditionStatus::Unknown,
            reasons::PROGRESSING,
            "no children observed yet",
        ),
    }
}
