//! Static permission-implication table.
//!
//! Holding a permission may implicitly grant others (holding `write_products`
//! grants `read_products`). The table is loaded once at startup and shared
//! immutably; it is not user-specific.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use stockdesk_core::{DomainError, DomainResult};

use crate::Permission;

/// Mapping from a held permission to the permissions it grants directly.
///
/// Resolution against this table is single-hop: `A -> B` and `B -> C` do
/// not make `A` grant `C`. Use [`PermissionGraph::transitive_closure`] to
/// build a closed table explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionGraph {
    implications: BTreeMap<Permission, BTreeSet<Permission>>,
}

/// Resource areas of the inventory console.
const CONSOLE_RESOURCES: [&str; 8] = [
    "products",
    "suppliers",
    "purchase_orders",
    "batches",
    "billing",
    "inventory",
    "reports",
    "users",
];

impl PermissionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(held, granted)` pairs.
    pub fn from_pairs<I, P, Q>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, Q)>,
        P: Into<Permission>,
        Q: Into<Permission>,
    {
        let mut graph = Self::new();
        for (held, granted) in pairs {
            graph
                .implications
                .entry(held.into())
                .or_default()
                .insert(granted.into());
        }
        graph
    }

    /// Parse a table from JSON: `{"write_products": ["read_products"]}`.
    pub fn from_json_str(raw: &str) -> DomainResult<Self> {
        let graph: Self = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation(format!("permission graph: {e}")))?;

        let blank = graph
            .implications
            .iter()
            .flat_map(|(held, granted)| core::iter::once(held).chain(granted))
            .any(|p| p.as_str().trim().is_empty());
        if blank {
            return Err(DomainError::validation(
                "permission graph: permission names must not be empty",
            ));
        }

        Ok(graph)
    }

    /// Built-in table for the inventory console.
    ///
    /// For every resource: `write_*` and `delete_*` grant `read_*`, and
    /// `manage_*` grants all three. Entries are listed directly because
    /// resolution is single-hop.
    pub fn inventory_defaults() -> Self {
        let mut pairs = Vec::new();
        for resource in CONSOLE_RESOURCES {
            let read = format!("read_{resource}");
            let write = format!("write_{resource}");
            let delete = format!("delete_{resource}");
            let manage = format!("manage_{resource}");

            pairs.push((write.clone(), read.clone()));
            pairs.push((delete.clone(), read.clone()));
            pairs.push((manage.clone(), read));
            pairs.push((manage.clone(), write));
            pairs.push((manage, delete));
        }
        pairs.push(("approve_purchase_orders".to_string(), "read_purchase_orders".to_string()));
        pairs.push(("print_labels".to_string(), "read_batches".to_string()));

        Self::from_pairs(pairs)
    }

    /// Whether holding `held` grants `wanted` through a single listed edge.
    pub fn implies(&self, held: &str, wanted: &str) -> bool {
        self.implications
            .get(held)
            .is_some_and(|granted| granted.contains(wanted))
    }

    /// Permissions granted directly by `held`.
    pub fn granted_by(&self, held: &str) -> impl Iterator<Item = &Permission> {
        self.implications.get(held).into_iter().flatten()
    }

    /// A new table closed under implication (every reachable permission is
    /// listed directly). Cycles are tolerated; a permission never lists itself.
    pub fn transitive_closure(&self) -> Self {
        let mut closed = BTreeMap::new();

        for start in self.implications.keys() {
            let mut reached: BTreeSet<Permission> = BTreeSet::new();
            let mut frontier: Vec<&Permission> = self.granted_by(start.as_str()).collect();

            while let Some(next) = frontier.pop() {
                if next == start || !reached.insert(next.clone()) {
                    continue;
                }
                frontier.extend(self.granted_by(next.as_str()));
            }

            closed.insert(start.clone(), reached);
        }

        Self { implications: closed }
    }

    pub fn len(&self) -> usize {
        self.implications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implications.is_empty()
    }
}
