//! First-come-first-served acceptance of identifier updates within one run.
//!
//! The claim table starts as the catalog snapshot's identifier ownership and
//! is updated as requests are accepted, so an identifier taken by an earlier
//! row is never handed to a different entry later in the same batch.

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::models::{format_ids, CatalogEntry, EntryId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOrigin {
    /// Held in the store before the run started.
    Stored,
    /// Accepted earlier in this run.
    Batch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Claim {
    pub entry: EntryId,
    pub origin: ClaimOrigin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Accepted { old_identifier: String },
    Noop,
    Conflict {
        owners: Vec<EntryId>,
        owner_names: Vec<String>,
        reason: String,
    },
    Error { reason: String },
}

/// Identifier ownership in a catalog snapshot, empty identifiers skipped.
pub fn snapshot_owners(catalog: &[CatalogEntry]) -> IndexMap<String, Vec<EntryId>> {
    let mut owners: IndexMap<String, Vec<EntryId>> = IndexMap::new();
    for entry in catalog {
        if !entry.current_identifier.is_empty() {
            owners
                .entry(entry.current_identifier.clone())
                .or_default()
                .push(entry.id);
        }
    }
    owners
}

#[derive(Clone, Debug, Default)]
pub struct ClaimTable {
    claims: IndexMap<String, Vec<Claim>>,
    current: IndexMap<EntryId, String>,
    names: IndexMap<EntryId, String>,
    reassigned: IndexSet<EntryId>,
}

impl ClaimTable {
    pub fn seed(catalog: &[CatalogEntry]) -> Self {
        let mut table = ClaimTable::default();
        for entry in catalog {
            table.current.insert(entry.id, entry.current_identifier.clone());
            table.names.insert(entry.id, entry.display_name.clone());
            if !entry.current_identifier.is_empty() {
                table
                    .claims
                    .entry(entry.current_identifier.clone())
                    .or_default()
                    .push(Claim {
                        entry: entry.id,
                        origin: ClaimOrigin::Stored,
                    });
            }
        }
        table
    }

    /// Identifier the entry holds as of this point in the run.
    pub fn current_identifier(&self, entry: EntryId) -> Option<&str> {
        self.current.get(&entry).map(String::as_str)
    }

    pub fn name_of(&self, entry: EntryId) -> &str {
        self.names.get(&entry).map(String::as_str).unwrap_or("")
    }

    pub fn holders(&self, identifier: &str) -> &[Claim] {
        self.claims.get(identifier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resolve(&mut self, entry: EntryId, identifier: &str) -> Resolution {
        let Some(current) = self.current.get(&entry) else {
            return Resolution::Error {
                reason: format!("entry {entry} not found in store"),
            };
        };
        if current == identifier {
            return Resolution::Noop;
        }

        let rivals: Vec<Claim> = self
            .holders(identifier)
            .iter()
            .copied()
            .filter(|claim| claim.entry != entry)
            .collect();
        if !rivals.is_empty() {
            let owners: Vec<EntryId> = rivals.iter().map(|c| c.entry).collect();
            let origin = if rivals.iter().any(|c| c.origin == ClaimOrigin::Stored) {
                "stored"
            } else {
                "claimed earlier in this run"
            };
            warn!(%entry, identifier, owners = %format_ids(&owners), origin, "identifier conflict");
            return Resolution::Conflict {
                owner_names: owners.iter().map(|id| self.name_of(*id).to_string()).collect(),
                reason: format!("identifier held by entries {} ({origin})", format_ids(&owners)),
                owners,
            };
        }

        if self.reassigned.contains(&entry) {
            warn!(%entry, identifier, "entry already reassigned in this run");
            return Resolution::Conflict {
                owners: Vec::new(),
                owner_names: Vec::new(),
                reason: format!(
                    "entry already reassigned to {:?} in this run",
                    current
                ),
            };
        }

        let old_identifier = current.clone();
        self.release(entry, &old_identifier);
        self.claims
            .entry(identifier.to_string())
            .or_default()
            .push(Claim {
                entry,
                origin: ClaimOrigin::Batch,
            });
        self.current.insert(entry, identifier.to_string());
        self.reassigned.insert(entry);
        Resolution::Accepted { old_identifier }
    }

    fn release(&mut self, entry: EntryId, identifier: &str) {
        if identifier.is_empty() {
            return;
        }
        if let Some(holders) = self.claims.get_mut(identifier) {
            holders.retain(|claim| claim.entry != entry);
            if holders.is_empty() {
                self.claims.shift_remove(identifier);
            }
        }
    }

    /// Every identifier with more than one holder; empty after a clean run
    /// that started from a clean snapshot.
    pub fn contested(&self) -> Vec<(&str, Vec<EntryId>)> {
        self.claims
            .iter()
            .filter(|(_, holders)| holders.len() > 1)
            .map(|(id, holders)| (id.as_str(), holders.iter().map(|c| c.entry).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredProduct;

    fn table(rows: &[(i64, &str, &str)]) -> ClaimTable {
        let catalog: Vec<CatalogEntry> = rows
            .iter()
            .map(|(id, name, sku)| CatalogEntry::from_stored(&StoredProduct::new(*id, name, sku)))
            .collect();
        ClaimTable::seed(&catalog)
    }

    #[test]
    fn test_unknown_entry_is_error() {
        let mut claims = table(&[(1, "A", "")]);
        assert!(matches!(
            claims.resolve(EntryId(99), "X"),
            Resolution::Error { .. }
        ));
    }

    #[test]
    fn test_same_identifier_is_noop() {
        let mut claims = table(&[(1, "A", "X1")]);
        assert_eq!(claims.resolve(EntryId(1), "X1"), Resolution::Noop);
    }

    #[test]
    fn test_stored_owner_conflicts() {
        let mut claims = table(&[(1, "A", ""), (2, "B", "Z9")]);
        match claims.resolve(EntryId(1), "Z9") {
            Resolution::Conflict {
                owners,
                owner_names,
                reason,
            } => {
                assert_eq!(owners, vec![EntryId(2)]);
                assert_eq!(owner_names, vec!["B".to_string()]);
                assert!(reason.contains("stored"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_first_claim_wins_within_run() {
        let mut claims = table(&[(1, "A", ""), (2, "B", "")]);
        assert_eq!(
            claims.resolve(EntryId(1), "X1"),
            Resolution::Accepted {
                old_identifier: String::new()
            }
        );
        match claims.resolve(EntryId(2), "X1") {
            Resolution::Conflict { owners, reason, .. } => {
                assert_eq!(owners, vec![EntryId(1)]);
                assert!(reason.contains("earlier in this run"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_releases_previous_identifier() {
        let mut claims = table(&[(1, "A", "OLD"), (2, "B", "")]);
        assert_eq!(
            claims.resolve(EntryId(1), "NEW"),
            Resolution::Accepted {
                old_identifier: "OLD".to_string()
            }
        );
        assert_eq!(claims.current_identifier(EntryId(1)), Some("NEW"));
        assert!(claims.holders("OLD").is_empty());
        // the freed identifier can go to another entry
        assert!(matches!(
            claims.resolve(EntryId(2), "OLD"),
            Resolution::Accepted { .. }
        ));
    }

    #[test]
    fn test_second_reassignment_of_same_entry_conflicts() {
        let mut claims = table(&[(1, "A", "")]);
        assert!(matches!(
            claims.resolve(EntryId(1), "X1"),
            Resolution::Accepted { .. }
        ));
        assert!(matches!(
            claims.resolve(EntryId(1), "X2"),
            Resolution::Conflict { .. }
        ));
        assert_eq!(claims.resolve(EntryId(1), "X1"), Resolution::Noop);
    }

    #[test]
    fn test_no_identifier_ends_with_two_owners() {
        let mut claims = table(&[(1, "A", ""), (2, "B", ""), (3, "C", "Q")]);
        let requests = [(1, "X"), (2, "X"), (3, "X"), (2, "Q"), (2, "Y"), (1, "Y")];
        for (entry, id) in requests {
            claims.resolve(EntryId(entry), id);
        }
        assert!(claims.contested().is_empty());
    }

    #[test]
    fn test_snapshot_owners_skips_empty() {
        let catalog = vec![
            CatalogEntry::from_stored(&StoredProduct::new(1, "A", "Z9")),
            CatalogEntry::from_stored(&StoredProduct::new(2, "B", "")),
            CatalogEntry::from_stored(&StoredProduct::new(3, "C", "Z9")),
        ];
        let owners = snapshot_owners(&catalog);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners["Z9"], vec![EntryId(1), EntryId(3)]);
    }
}
