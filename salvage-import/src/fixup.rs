//! Moving imported pages to where their legacy paths say they belong.
//!
//! Pages are often imported before their ideal parents exist, so they land
//! under a default parent. The fixup pass walks the tree and, for each page
//! not at its ideal route, resolves the ideal parent through a route finder
//! and moves (or renames) the page. A page whose parent cannot be found yet
//! waits in `find_parent_errors` under that parent's route; when a later
//! move brings a page to exactly that route, every waiting page is
//! reprocessed against it straight away.

use std::collections::BTreeMap;

use chrono::Utc;
use salvage_core::{Entity, EntityStore, LegacyHosts, Schema, StoreError, unique_slug};
use salvage_finder::{ConfigError, FindError, Finder, RoutableUrlOption};
use serde_json::Value;

use crate::error::ImportError;
use crate::page::{IdealPath, SiteRoots, relocate};
use crate::progress::{ImportProgress, RowInfo, SilentProgress};
use crate::reader::{Pager, Reader, WindowOptions};
use crate::settings::FixupSettings;

/// A finder resolving current routes to live pages of `kind`.
///
/// Failed lookups are not cached: the pages answering a route change as the
/// fixup pass moves them.
pub fn route_finder(schema: &Schema, hosts: &LegacyHosts, kind: &str) -> Result<Finder, ConfigError> {
    Ok(Finder::new(schema, hosts, kind, vec![Box::new(RoutableUrlOption::new())])?
        .cache_lookup_failures(false))
}

/// A page whose slug could not be set to its ideal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugConflict {
    pub ideal_slug: String,
    /// Whether the page was under its ideal parent when the conflict arose.
    pub has_ideal_parent: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FixupStats {
    pub processed: u64,
    pub skipped: u64,
    pub moved: u64,
    pub renamed: u64,
    pub failed: u64,
}

/// What a fixup run leaves unresolved.
#[derive(Debug, Default, Clone)]
pub struct FixupReport {
    pub stats: FixupStats,
    /// Parent route → ids of the pages waiting for it.
    pub find_parent_errors: BTreeMap<String, Vec<i64>>,
    pub slug_change_errors: BTreeMap<i64, SlugConflict>,
}

impl FixupReport {
    pub fn is_clean(&self) -> bool {
        self.find_parent_errors.is_empty() && self.slug_change_errors.is_empty()
    }

    /// Log the counts and everything left unresolved, describing pages
    /// through `store`.
    pub fn log(&self, store: &dyn EntityStore) {
        let s = &self.stats;
        log::info!(
            "{} pages processed: {} moved, {} renamed, {} skipped, {} failed",
            s.processed,
            s.moved,
            s.renamed,
            s.skipped,
            s.failed
        );
        let describe = |id: i64| match store.get(id) {
            Ok(Some(entity)) => entity.describe(),
            _ => format!("#{}", id),
        };

        if !self.find_parent_errors.is_empty() {
            log::info!("The following parents could not be found:");
            for (path, ids) in &self.find_parent_errors {
                let pages: Vec<String> = ids.iter().map(|id| describe(*id)).collect();
                log::warn!("Path: {} | Required for:\n * {}", path, pages.join("\n * "));
            }
        }
        if !self.slug_change_errors.is_empty() {
            log::info!("Slugs could not be corrected for the following pages:");
            for (id, conflict) in &self.slug_change_errors {
                log::warn!(
                    "{}\nIdeal slug: '{}'\nIdeally parented? {}",
                    describe(*id),
                    conflict.ideal_slug,
                    conflict.has_ideal_parent
                );
            }
        }
    }
}

/// The fixup pass. Consumed by [`Fixup::run`].
pub struct Fixup<'a> {
    store: &'a dyn EntityStore,
    finder: Finder,
    roots: SiteRoots,
    cache_limit: usize,
    dry_run: bool,
    resilient: bool,
    progress: &'a dyn ImportProgress,
    find_parent_errors: BTreeMap<String, Vec<i64>>,
    slug_change_errors: BTreeMap<i64, SlugConflict>,
    stats: FixupStats,
}

impl<'a> Fixup<'a> {
    /// `finder` resolves ideal parent routes; see [`route_finder`].
    pub fn new(store: &'a dyn EntityStore, finder: Finder) -> Result<Self, StoreError> {
        Ok(Self {
            store,
            finder,
            roots: SiteRoots::load(store)?,
            cache_limit: 250,
            dry_run: false,
            resilient: false,
            progress: &SilentProgress,
            find_parent_errors: BTreeMap::new(),
            slug_change_errors: BTreeMap::new(),
            stats: FixupStats::default(),
        })
    }

    pub fn settings(mut self, settings: &FixupSettings) -> Self {
        self.cache_limit = settings.cache_limit;
        self
    }

    /// Clear the finder's cache whenever it holds more than `limit` entries.
    pub fn cache_limit(mut self, limit: usize) -> Self {
        self.cache_limit = limit;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn resilient(mut self, resilient: bool) -> Self {
        self.resilient = resilient;
        self
    }

    pub fn progress(mut self, progress: &'a dyn ImportProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Fix every entity `reader` yields. Rows must carry the entity `id`;
    /// entities are always refetched, as earlier moves may have changed them.
    pub fn run(
        mut self,
        reader: &mut dyn Reader,
        window: &WindowOptions,
    ) -> Result<FixupReport, ImportError> {
        let started = Utc::now();
        let mut pager = Pager::new(window.window(reader.default_page_size())?);
        pager.load_totals(reader)?;
        let rows_to_process = pager.window().rows_to_process(pager.total_rows());
        self.progress.on_phase(&format!("Fixing page tree from {}", reader.source()));

        let mut position = 0;
        while let Some(page) = pager.next_page(reader)? {
            if let Some(number) = page.number {
                self.progress.on_page_started(number);
            }
            for (i, row) in page.rows.iter().enumerate() {
                position += 1;
                let info = RowInfo {
                    row: page.first_row + i as u64,
                    total_rows: pager.total_rows(),
                    page: page.number,
                    total_pages: pager.total_pages(),
                    page_row: page.number.map(|_| (i as u64 + 1, page.size)),
                    position,
                    rows_to_process,
                    elapsed: Utc::now() - started,
                };
                self.progress.on_row_started(&info);
                let result = self.fix_row(row);
                self.progress.on_row_completed(&info, result.is_ok());
                if let Err(e) = result {
                    self.stats.failed += 1;
                    if !self.resilient || !e.is_recoverable() {
                        return Err(e);
                    }
                    log::error!("Row {}: {}", info.row, e);
                }
            }
            if let Some(number) = page.number {
                self.progress.on_page_completed(number, page.end.as_ref());
            }
        }

        let report = FixupReport {
            stats: self.stats,
            find_parent_errors: self.find_parent_errors,
            slug_change_errors: self.slug_change_errors,
        };
        report.log(self.store);
        self.progress.on_complete("Page tree fixup complete");
        Ok(report)
    }

    fn fix_row(&mut self, row: &Value) -> Result<(), ImportError> {
        let Some(id) = row.get("id").and_then(Value::as_i64) else {
            log::warn!("Skipping row without an entity id");
            self.stats.skipped += 1;
            return Ok(());
        };
        let Some(entity) = self.store.get(id)? else {
            log::warn!("Entity {} no longer exists", id);
            self.stats.skipped += 1;
            return Ok(());
        };
        if let Some(ideal) = IdealPath::of(&entity)
            && self.has_ideal_path(&entity, &ideal)
        {
            log::debug!("{} is already at {}", entity.describe(), ideal.route());
            self.stats.skipped += 1;
            return Ok(());
        }
        self.fix(entity, None)
    }

    fn has_ideal_path(&self, entity: &Entity, ideal: &IdealPath) -> bool {
        self.roots.route(entity).is_some_and(|route| route == ideal.route())
    }

    fn has_ideal_parent(&self, entity: &Entity, ideal: &IdealPath) -> Result<bool, StoreError> {
        let Some(parent_id) = entity.parent_id else {
            return Ok(false);
        };
        Ok(self
            .store
            .get(parent_id)?
            .and_then(|parent| self.roots.route(&parent))
            .is_some_and(|route| route == ideal.parent_path))
    }

    /// The page currently answering `path`, if any.
    fn ideal_parent(&mut self, path: &str) -> Result<Option<Entity>, ImportError> {
        let result = self.finder.find(self.store, path);
        if self.finder.cache_len() > self.cache_limit {
            self.finder.clear_cache();
        }
        match result {
            Ok(parent) => Ok(Some(parent)),
            Err(FindError::NotFound { .. } | FindError::ValueNotSupported { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `ideal_slug` made unique under `parent_id`. Falls back to the current
    /// slug if that fails.
    fn possible_slug(&self, ideal_slug: &str, entity: &Entity, parent_id: Option<i64>) -> String {
        match unique_slug(self.store, ideal_slug, parent_id, entity.id) {
            Ok(slug) => slug,
            Err(e) => {
                log::error!("Unique slug generation failed for {}: {}", entity.describe(), e);
                entity.slug.clone()
            }
        }
    }

    /// Work out where `entity` should go and move it there if possible.
    /// `new_parent` is the ideal parent when it is already known.
    fn fix(&mut self, entity: Entity, new_parent: Option<Entity>) -> Result<(), ImportError> {
        self.stats.processed += 1;
        let Some(ideal) = IdealPath::of(&entity) else {
            self.stats.skipped += 1;
            return Ok(());
        };
        let id = entity
            .id
            .ok_or_else(|| StoreError::integrity("cannot fix an unsaved entity"))?;

        let mut target_parent = None;
        if !self.has_ideal_parent(&entity, &ideal)? {
            let found = match new_parent {
                Some(parent) => Some(parent),
                None => self.ideal_parent(&ideal.parent_path)?,
            };
            match found {
                Some(parent) => {
                    if parent.id != entity.parent_id {
                        log::debug!("{} can be moved to '{}'", entity.describe(), ideal.parent_path);
                        target_parent = Some(parent);
                        self.unblock(&ideal.parent_path, id);
                    }
                }
                None => {
                    log::debug!("{} cannot be moved to '{}'", entity.describe(), ideal.parent_path);
                    let waiting = self.find_parent_errors.entry(ideal.parent_path.clone()).or_default();
                    if !waiting.contains(&id) {
                        waiting.push(id);
                    }
                }
            }
        }

        let slug_parent = match &target_parent {
            Some(parent) => parent.id,
            None => entity.parent_id,
        };
        let slug = self.possible_slug(&ideal.slug, &entity, slug_parent);
        let new_slug = (slug != entity.slug).then_some(slug);
        if let Some(slug) = &new_slug {
            if *slug == ideal.slug {
                self.slug_change_errors.remove(&id);
            } else {
                log::debug!("{} cannot take the slug '{}'", entity.describe(), ideal.slug);
                self.slug_change_errors.insert(
                    id,
                    SlugConflict {
                        ideal_slug: ideal.slug.clone(),
                        has_ideal_parent: target_parent.is_some(),
                    },
                );
            }
        }

        if target_parent.is_none() && new_slug.is_none() {
            self.stats.skipped += 1;
            return Ok(());
        }
        self.save(entity, target_parent, new_slug)
    }

    fn unblock(&mut self, path: &str, id: i64) {
        if let Some(waiting) = self.find_parent_errors.get_mut(path) {
            waiting.retain(|w| *w != id);
            if waiting.is_empty() {
                self.find_parent_errors.remove(path);
            }
        }
    }

    /// Apply a move and/or slug change, then reprocess every page that was
    /// waiting for the route `entity` now answers.
    fn save(
        &mut self,
        mut entity: Entity,
        new_parent: Option<Entity>,
        new_slug: Option<String>,
    ) -> Result<(), ImportError> {
        if self.dry_run {
            log::info!(
                "Dry run: {} not changed (parent: {:?}, slug: {:?})",
                entity.describe(),
                new_parent.as_ref().map(|p| p.url_path.as_str()),
                new_slug
            );
            return Ok(());
        }

        if let Some(parent) = &new_parent {
            let parent_id = parent
                .id
                .ok_or_else(|| StoreError::integrity("ideal parent is unsaved"))?;
            let target_slug = new_slug.unwrap_or_else(|| entity.slug.clone());
            relocate(self.store, &mut entity, parent_id, &target_slug)?;
            self.stats.moved += 1;
            log::info!("Moved {} to {}", entity.describe(), entity.url_path);
        } else if let Some(slug) = new_slug {
            entity.slug = slug;
            self.store.save(&mut entity)?;
            self.stats.renamed += 1;
            log::info!("Renamed {} to {}", entity.describe(), entity.url_path);
        }
        self.finder.clear_cache();

        let Some(route) = self.roots.route(&entity) else {
            return Ok(());
        };
        if let Some(unblocked) = self.find_parent_errors.remove(&route) {
            log::debug!(
                "Reprocessing {} pages unblocked by {}",
                unblocked.len(),
                entity.describe()
            );
            for id in unblocked {
                if let Some(page) = self.store.get(id)? {
                    self.fix(page, Some(entity.clone()))?;
                }
            }
        }
        Ok(())
    }
}
