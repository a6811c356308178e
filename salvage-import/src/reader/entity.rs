//! Entities already in the store, read back for reprocessing.

use salvage_core::{EntityStore, Filter};
use serde_json::Value;

use super::{Reader, ReaderError};

/// Pages through the entities matching a filter.
///
/// The matching ids are collected on first use; each page then loads the
/// entities fresh, so changes made while processing earlier pages are
/// visible. Rows are the serialized entities.
pub struct EntityReader<'s> {
    store: &'s dyn EntityStore,
    filter: Filter,
    ids: Option<Vec<i64>>,
}

impl<'s> EntityReader<'s> {
    pub const DEFAULT_PAGE_SIZE: u64 = 500;

    pub fn new(store: &'s dyn EntityStore, filter: Filter) -> Self {
        Self {
            store,
            filter,
            ids: None,
        }
    }

    fn ids(&mut self) -> Result<&[i64], ReaderError> {
        if self.ids.is_none() {
            let ids = self
                .store
                .query(&self.filter)?
                .into_iter()
                .filter_map(|e| e.id)
                .collect();
            self.ids = Some(ids);
        }
        Ok(self.ids.as_deref().unwrap_or_default())
    }
}

impl Reader for EntityReader<'_> {
    fn source(&self) -> String {
        format!("entities:{:?}", self.filter)
    }

    fn default_page_size(&self) -> Option<u64> {
        Some(Self::DEFAULT_PAGE_SIZE)
    }

    fn total_rows(&mut self) -> Result<Option<u64>, ReaderError> {
        Ok(Some(self.ids()?.len() as u64))
    }

    fn fetch(&mut self, offset: u64, limit: Option<u64>) -> Result<Vec<Value>, ReaderError> {
        let take = limit.map_or(usize::MAX, |l| l as usize);
        let page: Vec<i64> = self
            .ids()?
            .iter()
            .skip(offset as usize)
            .take(take)
            .copied()
            .collect();

        let mut rows = Vec::with_capacity(page.len());
        for id in page {
            if let Some(entity) = self.store.get(id)? {
                rows.push(serde_json::to_value(&entity)?);
            }
        }
        Ok(rows)
    }
}
