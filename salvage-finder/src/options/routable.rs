//! Resolution of URLs by walking a site's page tree.

use salvage_core::{CacheKey, Entity, EntityStore, Filter, LegacyHosts, Site};

use crate::error::{ConfigError, FindError, LookupValueError};
use crate::option::{BindContext, LookupOption, Patterns};
use crate::options::path::domain_keys;
use crate::value::LookupValue;

/// Sites to try for a request, most specific first: exact host and port,
/// host on the default site, the default site, then the host on any port.
/// Without a host every site is tried.
pub fn candidate_sites(sites: &[Site], host: Option<&str>, port: Option<u16>) -> Vec<Site> {
    let Some(host) = host else {
        return sites.to_vec();
    };
    let port = port.unwrap_or(80);
    let same_host = |s: &Site| s.hostname.eq_ignore_ascii_case(host);

    let mut ordered: Vec<Site> = Vec::new();
    let tiers: [&dyn Fn(&Site) -> bool; 4] = [
        &|s: &Site| same_host(s) && s.port == port,
        &|s: &Site| same_host(s) && s.is_default,
        &|s: &Site| s.is_default,
        &|s: &Site| same_host(s),
    ];
    for tier in tiers {
        for site in sites.iter().filter(|s| tier(*s)) {
            if !ordered.iter().any(|o| o.id == site.id) {
                ordered.push(site.clone());
            }
        }
    }
    ordered
}

/// A path component a page slug could produce.
fn is_route_component(component: &str) -> bool {
    component
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Finds live entities by routing a URL path from a site root, one slug
/// per path component.
#[derive(Debug, Clone)]
pub struct RoutableUrlOption {
    patterns: Patterns,
    reject_query_strings: bool,
    reject_fragments: bool,
    hosts: LegacyHosts,
    target_kinds: Vec<String>,
    kind_label: String,
}

impl Default for RoutableUrlOption {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutableUrlOption {
    pub fn new() -> Self {
        Self {
            patterns: Patterns::default(),
            reject_query_strings: false,
            reject_fragments: false,
            hosts: LegacyHosts::default(),
            target_kinds: Vec::new(),
            kind_label: String::new(),
        }
    }

    pub fn reject_query_strings(mut self, reject: bool) -> Self {
        self.reject_query_strings = reject;
        self
    }

    pub fn reject_fragments(mut self, reject: bool) -> Self {
        self.reject_fragments = reject;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.patterns.case_sensitive = case_sensitive;
        self
    }

    pub fn valid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.add_valid(pattern);
        self
    }

    pub fn invalid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.add_invalid(pattern);
        self
    }

    fn route(
        &self,
        store: &dyn EntityStore,
        root_id: i64,
        components: &[&str],
    ) -> Result<Option<Entity>, FindError> {
        let Some(mut current) = store.get(root_id)? else {
            return Ok(None);
        };
        for component in components {
            let Some(id) = current.id else {
                return Ok(None);
            };
            let next = store
                .children(id)?
                .into_iter()
                .find(|child| child.live && child.slug == *component);
            match next {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl LookupOption for RoutableUrlOption {
    fn name(&self) -> String {
        "routable-url".to_string()
    }

    fn bind(&mut self, ctx: &BindContext<'_>) -> Result<(), ConfigError> {
        if !ctx.schema.contains(ctx.target_kind) {
            return Err(ConfigError::UnknownKind(ctx.target_kind.to_string()));
        }
        self.kind_label = ctx.target_kind.to_string();
        self.target_kinds = ctx.target_kinds();
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
        if self.hosts.is_external(url) {
            return Err(LookupValueError::DomainInvalid);
        }
        if self.reject_query_strings && url.query.as_deref().is_some_and(|q| !q.is_empty()) {
            return Err(LookupValueError::QueryStringPresent);
        }
        if self.reject_fragments && url.fragment.as_deref().is_some_and(|f| !f.is_empty()) {
            return Err(LookupValueError::FragmentPresent);
        }
        if !url
            .path
            .split('/')
            .filter(|c| !c.is_empty())
            .all(is_route_component)
        {
            return Err(LookupValueError::InvalidRoutePath);
        }
        self.patterns.check(&url.path)
    }

    fn get_match(
        &self,
        value: &LookupValue,
        store: &dyn EntityStore,
        base: &Filter,
    ) -> Result<Entity, FindError> {
        let url = value.url();
        let components: Vec<&str> = url.path.split('/').filter(|c| !c.is_empty()).collect();
        let sites = store.sites()?;

        for site in candidate_sites(&sites, url.host.as_deref(), url.port) {
            let Some(entity) = self.route(store, site.root_id, &components)? else {
                continue;
            };
            if !self.target_kinds.contains(&entity.kind) {
                continue;
            }
            let Some(id) = entity.id else { continue };
            let in_scope = Filter::and(vec![base.clone(), Filter::IdIn(vec![id])]);
            if !store.query(&in_scope)?.is_empty() {
                return Ok(entity);
            }
        }
        Err(FindError::not_found(self.kind_label.clone(), value))
    }

    fn extra_cache_keys(&self, value: &LookupValue) -> Vec<CacheKey> {
        domain_keys(value)
    }
}
