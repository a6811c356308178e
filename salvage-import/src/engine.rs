//! The row-processing engine.
//!
//! Each row is sanitized, matched to an existing entity through its source
//! id (or a new entity is started), cleaned by the [`ImportSpec`]'s fields, checked
//! and saved. In resilient mode a failing row is recorded in the
//! [`ImportReport`] and the run moves on; otherwise the first failure ends
//! the run, leaving the resume checkpoint at the failed row.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{Duration, Utc};
use salvage_core::{
    CacheKey, CheckpointStore, Entity, EntityStore, FieldKind, Filter, StoreError, is_empty_value,
};
use salvage_fields::{
    CleanContext, Field, FieldDefaults, FieldError, FieldSet, FileServices, RowErrors,
    ValidationError, extract_value,
};
use salvage_finder::FinderRegistry;
use serde_json::Value;

use crate::error::ImportError;
use crate::page::PagePlacement;
use crate::progress::{ImportProgress, RowInfo, SilentProgress};
use crate::reader::{Pager, Reader, WindowOptions};
use crate::resume::{ResumeCheckpoint, resume_key};
use crate::settings::Settings;

/// Entity attribute stamped with the time of the last import that touched it.
pub const LAST_IMPORTED_AT_ATTR: &str = "last_imported_at";

/// Normalized source id: integers and digit strings share a key.
pub fn source_key(value: &Value) -> CacheKey {
    match FieldKind::Integer.coerce(value) {
        Ok(int) => CacheKey::from_value(&int),
        Err(_) => match value {
            Value::String(s) => CacheKey::text(s.trim()),
            other => CacheKey::from_value(other),
        },
    }
}

fn key_value(key: &CacheKey) -> Value {
    match key {
        CacheKey::Null => Value::Null,
        CacheKey::Bool(b) => Value::Bool(*b),
        CacheKey::Int(i) => Value::from(*i),
        CacheKey::Float(bits) => Value::from(f64::from_bits(*bits)),
        CacheKey::Text(s) | CacheKey::Json(s) => Value::String(s.clone()),
    }
}

// ── Hooks ───────────────────────────────────────────────────────────────────

/// Per-import customization points around the field pipeline.
pub trait RowHooks {
    /// Adjust a raw row before anything reads it.
    fn sanitize_row(&self, _row: &mut Value) {}

    /// Whether an existing entity should be updated from `row`. Entities
    /// that are not stale are skipped unless the run forces updates.
    fn is_stale(&self, _entity: &Entity, _row: &Value) -> bool {
        true
    }

    /// Further changes after the cleaned field values have been applied.
    fn update(&self, _entity: &mut Entity, _row: &Value, _is_new: bool) {}

    /// Entity-level checks run before saving.
    fn validate(&self, _entity: &Entity) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Hooks that change nothing.
pub struct DefaultHooks;

impl RowHooks for DefaultHooks {}

// ── Spec and options ────────────────────────────────────────────────────────

/// What an import produces: the target kind, how rows map to entities,
/// and the fields that clean them.
pub struct ImportSpec {
    name: String,
    target_kind: String,
    source_id_path: String,
    legacy_id_attr: String,
    fields: FieldSet,
    defaults: FieldDefaults,
    pages: Option<PagePlacement>,
    hooks: Box<dyn RowHooks>,
}

impl ImportSpec {
    /// Rows are identified by their `id` value, stored on the entity as
    /// `legacy_id`.
    pub fn new(name: impl Into<String>, target_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_kind: target_kind.into(),
            source_id_path: "id".to_string(),
            legacy_id_attr: "legacy_id".to_string(),
            fields: FieldSet::new(),
            defaults: FieldDefaults::default(),
            pages: None,
            hooks: Box::new(DefaultHooks),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_kind(&self) -> &str {
        &self.target_kind
    }

    /// Row path of the source id.
    pub fn source_id(mut self, path: impl Into<String>) -> Self {
        self.source_id_path = path.into();
        self
    }

    /// Entity attribute the source id is stored in.
    pub fn legacy_id_attr(mut self, attr: impl Into<String>) -> Self {
        self.legacy_id_attr = attr.into();
        self
    }

    pub fn field(mut self, field: impl Field + 'static) -> Self {
        self.fields.add(field);
        self
    }

    pub fn fields(mut self, fields: FieldSet) -> Self {
        self.fields = fields;
        self
    }

    /// Strategy defaults for fields without their own.
    pub fn defaults(mut self, defaults: FieldDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Save entities into the page tree.
    pub fn pages(mut self, placement: PagePlacement) -> Self {
        self.pages = Some(placement);
        self
    }

    pub fn hooks(mut self, hooks: impl RowHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }
}

/// Options for one run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Record failing rows and carry on instead of stopping.
    pub resilient: bool,
    /// Clean and validate, but save nothing.
    pub dry_run: bool,
    /// Start from the row a previous run with the same options reached.
    pub resume: bool,
    /// Update existing entities even when they are not stale.
    pub force_update: bool,
    /// Only create; skip rows whose entity exists.
    pub no_update: bool,
    pub source_ids_to_ignore: Vec<Value>,
    pub window: WindowOptions,
    /// Page size for paginated readers when the window sets none.
    pub page_size: Option<u64>,
    pub checkpoint_ttl: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            resilient: false,
            dry_run: false,
            resume: false,
            force_update: false,
            no_update: false,
            source_ids_to_ignore: Vec::new(),
            window: WindowOptions::default(),
            page_size: None,
            checkpoint_ttl: Duration::hours(24),
        }
    }
}

impl ImportOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            resilient: settings.import.resilient,
            page_size: Some(settings.import.page_size),
            checkpoint_ttl: settings.checkpoint_ttl(),
            ..Self::default()
        }
    }

    pub fn resilient(mut self, resilient: bool) -> Self {
        self.resilient = resilient;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn window(mut self, window: WindowOptions) -> Self {
        self.window = window;
        self
    }
}

// ── Results ─────────────────────────────────────────────────────────────────

/// Statistics from a single import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub total_rows: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub failed: u64,
}

/// A row a resilient run could not import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub page: Option<u64>,
    pub row: u64,
    pub source_id: Option<String>,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let page = self.page.map_or("-".to_string(), |p| p.to_string());
        let source_id = self.source_id.as_deref().unwrap_or("-");
        write!(
            f,
            "Page: {} | Row: {} | Source ID: {}\n\n{}",
            page, self.row, source_id, self.message
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct ImportReport {
    pub stats: ImportStats,
    pub errors: Vec<RowError>,
    pub dry_run: bool,
}

impl ImportReport {
    /// Log the counts and every recorded row error.
    pub fn log_summary(&self) {
        let s = &self.stats;
        log::info!(
            "{}{} rows: {} created, {} updated, {} skipped, {} invalid, {} failed",
            if self.dry_run { "[dry run] " } else { "" },
            s.total_rows,
            s.created,
            s.updated,
            s.skipped,
            s.invalid,
            s.failed
        );
        if !self.errors.is_empty() {
            log::warn!("{} rows could not be imported:", self.errors.len());
            for error in &self.errors {
                log::warn!("{}", error);
            }
        }
    }
}

enum RowOutcome {
    Created,
    Updated,
    Skipped(&'static str),
}

enum RowFailure {
    Invalid(RowErrors),
    Error(ImportError),
}

impl From<ImportError> for RowFailure {
    fn from(e: ImportError) -> Self {
        Self::Error(e)
    }
}

impl From<StoreError> for RowFailure {
    fn from(e: StoreError) -> Self {
        Self::Error(e.into())
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

/// Everything a run needs besides its [`ImportSpec`] and reader: the store, the
/// finders (whose caches outlive a single run), file services and the
/// checkpoint store.
pub struct ImportSession<'a> {
    store: &'a dyn EntityStore,
    finders: FinderRegistry,
    files: Option<&'a FileServices>,
    checkpoints: Option<&'a dyn CheckpointStore>,
    progress: &'a dyn ImportProgress,
}

impl<'a> ImportSession<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            finders: FinderRegistry::new(),
            files: None,
            checkpoints: None,
            progress: &SilentProgress,
        }
    }

    pub fn finders(mut self, finders: FinderRegistry) -> Self {
        self.finders = finders;
        self
    }

    pub fn files(mut self, files: &'a FileServices) -> Self {
        self.files = Some(files);
        self
    }

    pub fn checkpoints(mut self, checkpoints: &'a dyn CheckpointStore) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn progress(mut self, progress: &'a dyn ImportProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn finder_registry(&self) -> &FinderRegistry {
        &self.finders
    }

    pub fn finder_registry_mut(&mut self) -> &mut FinderRegistry {
        &mut self.finders
    }

    /// Import every row `reader` yields within the options' window.
    pub fn run(
        &mut self,
        spec: &mut ImportSpec,
        reader: &mut dyn Reader,
        options: &ImportOptions,
    ) -> Result<ImportReport, ImportError> {
        let started = Utc::now();
        spec.fields.bind(&self.finders, &spec.defaults)?;
        if let Some(pages) = &spec.pages {
            pages.check(&self.finders)?;
        }
        let spec: &ImportSpec = spec;

        let mut key_values = vec![("command", spec.name.clone()), ("source", reader.source())];
        if let Some(row) = options.window.row {
            key_values.push(("row", row.to_string()));
        }
        let checkpoint = self
            .checkpoints
            .map(|store| ResumeCheckpoint::new(store, resume_key(key_values), options.checkpoint_ttl));

        let mut window = options.window.clone();
        if options.resume {
            let checkpoint = checkpoint.as_ref().ok_or(ImportError::NoCheckpointStore)?;
            let row = checkpoint.load()?.ok_or(ImportError::NoResumeProgress)?;
            log::info!("Resuming from row: {}", row);
            if let Some(single) = window.row.take() {
                window.stop_row = Some(single);
            }
            window.start_row = Some(row);
            window.page = None;
            window.start_page = None;
            window.stop_page = None;
        }
        let default_page_size = reader
            .default_page_size()
            .map(|size| options.page_size.unwrap_or(size));
        let mut pager = Pager::new(window.window(default_page_size)?);
        pager.load_totals(reader)?;
        let rows_to_process = pager.window().rows_to_process(pager.total_rows());

        let mut existing = self.existing_source_ids(spec)?;
        let ignored: HashSet<CacheKey> = options.source_ids_to_ignore.iter().map(source_key).collect();
        let mut report = ImportReport {
            dry_run: options.dry_run,
            ..ImportReport::default()
        };

        self.progress
            .on_phase(&format!("Importing {} from {}", spec.name, reader.source()));

        let mut position = 0;
        while let Some(page) = pager.next_page(reader)? {
            if let Some(number) = page.number {
                self.progress.on_page_started(number);
            }
            for (i, mut row) in page.rows.into_iter().enumerate() {
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
                if let Some(checkpoint) = &checkpoint {
                    checkpoint.save(info.row)?;
                }
                report.stats.total_rows += 1;

                let result = self.process_row(spec, &mut row, options, &mut existing, &ignored);
                let successful = result.is_ok();
                let recorded = record(result, &info, spec, &row, options, &mut report);
                self.progress.on_row_completed(&info, successful);
                recorded?;
            }
            if let Some(number) = page.number {
                self.progress.on_page_completed(number, page.end.as_ref());
            }
        }

        if let Some(checkpoint) = &checkpoint {
            checkpoint.clear()?;
        }
        report.log_summary();
        self.progress.on_complete(&format!(
            "Finished {}: {} rows processed",
            spec.name, report.stats.total_rows
        ));
        Ok(report)
    }

    /// Entity ids by normalized source id for every entity of the target
    /// kind already imported. Where several share a source id the earliest
    /// wins.
    fn existing_source_ids(&self, spec: &ImportSpec) -> Result<HashMap<CacheKey, i64>, StoreError> {
        let pairs = self
            .store
            .attribute_ids(&Filter::kinds([spec.target_kind.as_str()]), &spec.legacy_id_attr)?;
        let mut existing = HashMap::with_capacity(pairs.len());
        for (key, id) in pairs {
            existing.entry(source_key(&key_value(&key))).or_insert(id);
        }
        Ok(existing)
    }

    fn process_row(
        &mut self,
        spec: &ImportSpec,
        row: &mut Value,
        options: &ImportOptions,
        existing: &mut HashMap<CacheKey, i64>,
        ignored: &HashSet<CacheKey>,
    ) -> Result<RowOutcome, RowFailure> {
        spec.hooks.sanitize_row(row);
        let row: &Value = row;

        let key = match extract_value(row, &spec.source_id_path) {
            Ok(value) if !is_empty_value(value) => source_key(value),
            _ => {
                return Err(ImportError::MissingSourceId {
                    path: spec.source_id_path.clone(),
                }
                .into());
            }
        };
        if ignored.contains(&key) {
            return Ok(RowOutcome::Skipped("source id is ignored"));
        }
        let existing_id = existing.get(&key).copied();
        if existing_id.is_some() && options.no_update {
            return Ok(RowOutcome::Skipped("already imported"));
        }

        let found = match existing_id {
            Some(id) => self.store.get(id)?,
            None => None,
        };
        let mut entity = found.unwrap_or_else(|| {
            Entity::new(&spec.target_kind).with_attr(&spec.legacy_id_attr, key_value(&key))
        });
        let is_new = entity.is_new();
        if !is_new && !options.force_update && !spec.hooks.is_stale(&entity, row) {
            return Ok(RowOutcome::Skipped("up to date"));
        }

        let cleaned = {
            let mut ctx = CleanContext {
                store: self.store,
                finders: &mut self.finders,
                files: self.files,
                defaults: &spec.defaults,
                row,
                current: Some(&entity),
            };
            match spec.fields.clean_row(&mut ctx) {
                Ok(cleaned) => cleaned,
                Err(FieldError::SkipRow) => return Ok(RowOutcome::Skipped("skipped by a field")),
                Err(FieldError::Invalid(e)) => {
                    let mut errors = RowErrors::new();
                    errors.push("row", e);
                    return Err(RowFailure::Invalid(errors));
                }
                Err(e) => return Err(ImportError::from(e).into()),
            }
        };
        if !cleaned.errors.is_empty() {
            return Err(RowFailure::Invalid(cleaned.errors));
        }

        entity.set_attr(LAST_IMPORTED_AT_ATTR, Value::String(Utc::now().to_rfc3339()));
        spec.fields.update_entity(&mut entity, &cleaned.data, is_new);
        spec.hooks.update(&mut entity, row, is_new);
        if let Err(e) = spec.hooks.validate(&entity) {
            let mut errors = RowErrors::new();
            errors.push("entity", e);
            return Err(RowFailure::Invalid(errors));
        }

        if options.dry_run {
            log::info!("Dry run: {} not saved", entity.describe());
        } else {
            match &spec.pages {
                Some(pages) => pages.save(self.store, &mut self.finders, &mut entity)?,
                None => self.store.save(&mut entity)?,
            }
            log::debug!("Saved {}", entity.describe());
            if let Some(id) = entity.id {
                existing.entry(key).or_insert(id);
            }
        }

        Ok(if is_new {
            RowOutcome::Created
        } else {
            RowOutcome::Updated
        })
    }
}

/// Count a row's outcome. Failures end the run unless it is resilient and
/// the failure recoverable, in which case they are added to the report.
fn record(
    result: Result<RowOutcome, RowFailure>,
    info: &RowInfo,
    spec: &ImportSpec,
    row: &Value,
    options: &ImportOptions,
    report: &mut ImportReport,
) -> Result<(), ImportError> {
    let source_id = || {
        extract_value(row, &spec.source_id_path)
            .ok()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    };
    let stats = &mut report.stats;

    let error = match result {
        Ok(RowOutcome::Created) => {
            stats.created += 1;
            return Ok(());
        }
        Ok(RowOutcome::Updated) => {
            stats.updated += 1;
            return Ok(());
        }
        Ok(RowOutcome::Skipped(reason)) => {
            stats.skipped += 1;
            log::info!("Skipping row {}: {}", info.row, reason);
            return Ok(());
        }
        Err(RowFailure::Invalid(errors)) => {
            stats.invalid += 1;
            if !options.resilient {
                return Err(ImportError::InvalidRow {
                    row: info.row,
                    source_id: source_id().unwrap_or_default(),
                    errors,
                });
            }
            RowError {
                page: info.page,
                row: info.row,
                source_id: source_id(),
                message: format!("Invalid data: {}", errors),
            }
        }
        Err(RowFailure::Error(e)) => {
            stats.failed += 1;
            if !options.resilient || !e.is_recoverable() {
                return Err(e);
            }
            RowError {
                page: info.page,
                row: info.row,
                source_id: source_id(),
                message: format!("Error occurred while processing row: {}", e),
            }
        }
    };
    log::error!("{}", error);
    report.errors.push(error);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_keys_normalize_digit_strings() {
        assert_eq!(source_key(&json!(6)), CacheKey::Int(6));
        assert_eq!(source_key(&json!("6")), CacheKey::Int(6));
        assert_eq!(source_key(&json!(" abc ")), CacheKey::text("abc"));
    }

    #[test]
    fn row_errors_render_their_context() {
        let error = RowError {
            page: None,
            row: 4,
            source_id: Some("17".into()),
            message: "Invalid data".into(),
        };
        assert_eq!(
            error.to_string(),
            "Page: - | Row: 4 | Source ID: 17\n\nInvalid data"
        );
    }
}
