//! In-memory catalog used by tests and benchmarks.

use crate::errors::{ReconcileError, ReconcileResult};
use crate::models::{EntryId, StoredProduct};
use crate::store::{CatalogStore, IdentifierWriter};

#[derive(Clone, Debug, Default)]
pub struct MemoryCatalogStore {
    products: Vec<StoredProduct>,
}

impl MemoryCatalogStore {
    pub fn new(products: Vec<StoredProduct>) -> Self {
        Self { products }
    }
}

/// Staged copy of the catalog; only swapped in on commit.
struct StagedWriter {
    staged: Vec<StoredProduct>,
}

impl IdentifierWriter for StagedWriter {
    fn update_identifier(&mut self, id: EntryId, value: &str) -> ReconcileResult<()> {
        let product = self
            .staged
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ReconcileError::Store(format!("entry {id} not found")))?;
        product.current_identifier = value.to_string();
        Ok(())
    }

    fn find_owner(&mut self, identifier: &str, excluding: EntryId) -> ReconcileResult<Option<EntryId>> {
        Ok(self
            .staged
            .iter()
            .find(|p| p.id != excluding && p.current_identifier.trim() == identifier)
            .map(|p| p.id))
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn fetch_all(&self) -> ReconcileResult<Vec<StoredProduct>> {
        Ok(self.products.clone())
    }

    fn with_transaction(
        &mut self,
        work: &mut dyn FnMut(&mut dyn IdentifierWriter) -> ReconcileResult<()>,
    ) -> ReconcileResult<()> {
        let mut writer = StagedWriter {
            staged: self.products.clone(),
        };
        work(&mut writer)?;
        self.products = writer.staged;
        Ok(())
    }
}
