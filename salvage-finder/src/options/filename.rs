//! Fuzzy matching of legacy file paths against stored file names.
//!
//! Stored files rarely keep their legacy directory. Names may also have
//! gained a 7 character disambiguation suffix when stored, or a different
//! extension after format conversion. Candidates are ranked:
//!
//! | Rank | Match |
//! |---|---|
//! | 0 | full path |
//! | 1 | file name and extension |
//! | 2 | file name with suffix, same extension |
//! | 3 | file name, different extension |
//! | 4 | anything else the prefilter allowed |

use salvage_core::{
    CacheKey, Entity, EntityStore, Filter, LegacyHosts, Ranking, normalize_path, storage_filename,
    unquote_plus,
};

use crate::error::{ConfigError, FindError, LookupValueError};
use crate::option::{BindContext, LookupOption, Patterns};
use crate::value::LookupValue;

/// Whether a path ends in a 2-5 character alphanumeric extension.
fn has_file_extension(path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) => {
            (2..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// A legacy file name split the way it would have been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredName {
    pub filename: String,
    pub stem: String,
    pub extension: String,
}

impl StoredName {
    pub fn from_path(path: &str) -> Self {
        let base = path.rsplit('/').next().unwrap_or_default();
        let filename = storage_filename(&unquote_plus(base));
        let (stem, extension) = match filename.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), ext.to_string()),
            None => (filename.clone(), String::new()),
        };
        Self {
            filename,
            stem,
            extension,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilenameOption {
    field: String,
    patterns: Patterns,
    hosts: LegacyHosts,
    kind_label: String,
}

impl FilenameOption {
    /// Match against the file path stored in `field`. Matching is always
    /// case-insensitive.
    pub fn new(field: impl Into<String>) -> Self {
        let patterns = Patterns {
            case_sensitive: false,
            ..Default::default()
        };
        Self {
            field: field.into(),
            patterns,
            hosts: LegacyHosts::default(),
            kind_label: String::new(),
        }
    }

    pub fn valid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.add_valid(pattern);
        self
    }

    pub fn invalid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.add_invalid(pattern);
        self
    }

    fn prefilter(&self, name: &StoredName) -> Filter {
        Filter::regex(
            self.field.clone(),
            format!(
                r"(?i)(^|/){}(_[a-zA-Z0-9]{{7}})?\.[a-zA-Z0-9]{{2,5}}$",
                regex::escape(&name.stem)
            ),
        )
    }

    fn ranking(&self, value: &LookupValue, name: &StoredName) -> Ranking {
        let path = value.normalized_path();
        let field = self.field.as_str();
        Ranking::new(vec![
            Filter::or(vec![
                Filter::ieq(field, path),
                Filter::ieq(field, path.trim_start_matches('/')),
            ]),
            Filter::or(vec![
                Filter::iends_with(field, format!("/{}", name.filename)),
                Filter::ieq(field, name.filename.clone()),
            ]),
            Filter::and(vec![
                Filter::regex(
                    field,
                    format!(r"(?i)(^|/){}_[a-zA-Z0-9]{{7}}\.", regex::escape(&name.stem)),
                ),
                Filter::iends_with(field, format!(".{}", name.extension)),
            ]),
            Filter::regex(
                field,
                format!(r"(?i)(^|/){}\.[a-zA-Z0-9]{{2,5}}$", regex::escape(&name.stem)),
            ),
        ])
    }
}

impl LookupOption for FilenameOption {
    fn name(&self) -> String {
        format!("filename:{}", self.field)
    }

    fn bind(&mut self, ctx: &BindContext<'_>) -> Result<(), ConfigError> {
        if !ctx.schema.contains(ctx.target_kind) {
            return Err(ConfigError::UnknownKind(ctx.target_kind.to_string()));
        }
        if ctx.schema.field(ctx.target_kind, &self.field).is_none() {
            return Err(ConfigError::UnknownField {
                kind: ctx.target_kind.to_string(),
                field: self.field.clone(),
            });
        }
        self.kind_label = ctx.target_kind.to_string();
        self.hosts = ctx.hosts.clone();
        self.patterns.compile()
    }

    fn validate(&self, value: &LookupValue) -> Result<(), LookupValueError> {
        if value.as_str().is_none() {
            return Err(LookupValueError::TypeIncompatible("not a string".into()));
        }
        if value.is_numeric() {
            return Err(LookupValueError::NumericValue);
        }
        let url = value.url();
        if !self.hosts.is_media(url) {
            return Err(LookupValueError::DomainInvalid);
        }
        if !has_file_extension(&url.path) {
            return Err(LookupValueError::ExtensionInvalid);
        }
        self.patterns.check(&url.path)
    }

    fn get_match(
        &self,
        value: &LookupValue,
        store: &dyn EntityStore,
        base: &Filter,
    ) -> Result<Entity, FindError> {
        let name = StoredName::from_path(&value.url().path);
        let filter = Filter::and(vec![base.clone(), self.prefilter(&name)]);
        let ranked = store.query_ranked(&filter, &self.ranking(value, &name))?;

        match ranked.into_iter().next() {
            Some((entity, rank)) => {
                log::debug!("'{}' matched {} at rank {}", value, entity.describe(), rank);
                Ok(entity)
            }
            None => Err(FindError::not_found(self.kind_label.clone(), value)),
        }
    }

    fn extra_cache_keys(&self, value: &LookupValue) -> Vec<CacheKey> {
        vec![CacheKey::text(value.normalized_path().to_lowercase())]
    }

    fn extra_cache_keys_from_result(&self, entity: &Entity) -> Vec<CacheKey> {
        match entity.attr_str(&self.field) {
            Some(file) => vec![CacheKey::text(normalize_path(&file).to_lowercase())],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_name_matches_storage_rules() {
        let name = StoredName::from_path("/legacy/My+Photo%281%29.JPG");
        assert_eq!(name.filename, "My_Photo1.JPG");
        assert_eq!(name.stem, "My_Photo1");
        assert_eq!(name.extension, "JPG");
    }

    #[test]
    fn extension_check() {
        assert!(has_file_extension("/a/photo.jpeg"));
        assert!(!has_file_extension("/a/photo"));
        assert!(!has_file_extension("/a.b/photo"));
        assert!(!has_file_extension("/a/archive.backup1"));
    }

    #[test]
    fn prefilter_allows_suffix_and_other_extensions() {
        let option = FilenameOption::new("file");
        let name = StoredName::from_path("/legacy/photo.jpg");
        let Filter::Regex { pattern, .. } = option.prefilter(&name) else {
            panic!("expected a regex filter");
        };
        let re = regex::Regex::new(&pattern).unwrap();
        assert!(re.is_match("images/photo.jpg"));
        assert!(re.is_match("images/photo_ab12345.jpg"));
        assert!(re.is_match("images/PHOTO.webp"));
        assert!(!re.is_match("images/myphoto.jpg"));
        assert!(!re.is_match("images/photo_ab1.jpg"));
    }
}
