//! Catalog persistence: the store contract and its adapters.

pub mod database;
pub mod memory;
pub mod schema;

use tracing::{debug, info, warn};

use crate::errors::{ReconcileError, ReconcileResult};
use crate::models::{EntryId, StoredProduct};

/// Write access granted for the duration of one transaction.
pub trait IdentifierWriter {
    /// Fails when no entry has this id.
    fn update_identifier(&mut self, id: EntryId, value: &str) -> ReconcileResult<()>;

    /// Some entry other than `excluding` currently holding `identifier`.
    fn find_owner(&mut self, identifier: &str, excluding: EntryId) -> ReconcileResult<Option<EntryId>>;
}

pub trait CatalogStore {
    fn fetch_all(&self) -> ReconcileResult<Vec<StoredProduct>>;

    /// Run `work` inside one transaction: committed when it returns `Ok`,
    /// rolled back otherwise.
    fn with_transaction(
        &mut self,
        work: &mut dyn FnMut(&mut dyn IdentifierWriter) -> ReconcileResult<()>,
    ) -> ReconcileResult<()>;
}

/// One accepted identifier change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUpdate {
    pub entry: EntryId,
    pub old_identifier: String,
    pub new_identifier: String,
}

/// Write every update in one transaction, re-checking ownership before each
/// write. Any collision or write failure rolls the whole batch back.
pub fn apply_updates(store: &mut dyn CatalogStore, updates: &[PendingUpdate]) -> ReconcileResult<usize> {
    if updates.is_empty() {
        return Ok(0);
    }
    let mut written = 0usize;
    let result = store.with_transaction(&mut |writer: &mut dyn IdentifierWriter| {
        written = 0;
        for update in updates {
            if let Some(owner) = writer.find_owner(&update.new_identifier, update.entry)? {
                return Err(ReconcileError::Transaction(format!(
                    "identifier {:?} for entry {} is held by entry {owner}",
                    update.new_identifier, update.entry
                )));
            }
            writer.update_identifier(update.entry, &update.new_identifier)?;
            debug!(
                entry = %update.entry,
                old = %update.old_identifier,
                new = %update.new_identifier,
                "identifier updated"
            );
            written += 1;
        }
        Ok(())
    });
    match result {
        Ok(()) => {
            info!(updated = written, "transaction committed");
            Ok(written)
        }
        Err(e) => {
            warn!(error = %e, pending = updates.len(), "transaction rolled back");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryCatalogStore;
    use super::*;

    fn update(entry: i64, old: &str, new: &str) -> PendingUpdate {
        PendingUpdate {
            entry: EntryId(entry),
            old_identifier: old.to_string(),
            new_identifier: new.to_string(),
        }
    }

    #[test]
    fn test_apply_updates_commits_in_order() {
        let mut store = MemoryCatalogStore::new(vec![
            StoredProduct::new(1, "A", "OLD"),
            StoredProduct::new(2, "B", ""),
        ]);
        // entry 2 takes the identifier entry 1 just gave up
        let written =
            apply_updates(&mut store, &[update(1, "OLD", "NEW"), update(2, "", "OLD")]).unwrap();
        assert_eq!(written, 2);
        let rows = store.fetch_all().unwrap();
        assert_eq!(rows[0].current_identifier, "NEW");
        assert_eq!(rows[1].current_identifier, "OLD");
    }

    #[test]
    fn test_apply_updates_rolls_back_on_collision() {
        let mut store = MemoryCatalogStore::new(vec![
            StoredProduct::new(1, "A", ""),
            StoredProduct::new(2, "B", "Z9"),
        ]);
        let err = apply_updates(&mut store, &[update(1, "", "X1"), update(1, "X1", "Z9")])
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Transaction(_)));
        assert_eq!(store.fetch_all().unwrap()[0].current_identifier, "");
    }

    #[test]
    fn test_apply_updates_rolls_back_on_unknown_entry() {
        let mut store = MemoryCatalogStore::new(vec![StoredProduct::new(1, "A", "")]);
        assert!(apply_updates(&mut store, &[update(1, "", "X1"), update(7, "", "X2")]).is_err());
        assert_eq!(store.fetch_all().unwrap()[0].current_identifier, "");
    }

    #[test]
    fn test_apply_nothing_is_ok() {
        let mut store = MemoryCatalogStore::new(vec![]);
        assert_eq!(apply_updates(&mut store, &[]).unwrap(), 0);
    }
}
