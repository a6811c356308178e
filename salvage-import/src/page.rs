//! Placing imported pages in the tree.
//!
//! A page's legacy path says where it ideally lives: `/about/team` wants
//! the slug `team` beneath whatever page now answers `/about`. Pages whose
//! ideal parent does not exist yet go to a default parent, and the fixup
//! pass moves them once it does.

use salvage_core::{
    Entity, EntityStore, Filter, Position, StoreError, normalize_path, slugify, unique_slug,
};
use salvage_finder::{FindError, FinderRegistry};

use crate::error::ImportError;

/// Entity attribute holding the legacy path of a page.
pub const LEGACY_PATH_ATTR: &str = "legacy_path";

/// Where a page would live if its legacy URL structure were kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdealPath {
    /// Normalized route of the ideal parent, `/` for the site root.
    pub parent_path: String,
    pub slug: String,
}

impl IdealPath {
    /// Every segment is slugified, as the pages answering them were.
    /// `None` for the root path and for paths whose last segment yields no
    /// slug.
    pub fn from_legacy_path(legacy_path: &str) -> Option<Self> {
        let normalized = normalize_path(legacy_path);
        let mut segments: Vec<String> = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .map(slugify)
            .collect();
        let slug = segments.pop().filter(|s| !s.is_empty())?;
        segments.retain(|s| !s.is_empty());
        Some(Self {
            parent_path: format!("/{}", segments.join("/")),
            slug,
        })
    }

    pub fn of(entity: &Entity) -> Option<Self> {
        Self::from_legacy_path(&entity.attr_str(LEGACY_PATH_ATTR)?)
    }

    /// The full ideal route.
    pub fn route(&self) -> String {
        if self.parent_path == "/" {
            format!("/{}", self.slug)
        } else {
            format!("{}/{}", self.parent_path, self.slug)
        }
    }
}

/// The url paths of every site root, used to turn an entity's stored
/// `url_path` into the route it answers on.
#[derive(Debug, Clone, Default)]
pub struct SiteRoots {
    /// Root url paths, default site first.
    roots: Vec<String>,
}

impl SiteRoots {
    pub fn load(store: &dyn EntityStore) -> Result<Self, StoreError> {
        let mut sites = store.sites()?;
        sites.sort_by_key(|s| !s.is_default);
        let mut roots = Vec::new();
        for site in sites {
            if let Some(root) = store.get(site.root_id)? {
                roots.push(root.url_path);
            }
        }
        Ok(Self { roots })
    }

    /// The normalized route of `entity`, or `None` if it is not beneath a
    /// site root.
    pub fn route(&self, entity: &Entity) -> Option<String> {
        self.roots
            .iter()
            .find_map(|root| entity.url_path.strip_prefix(root.as_str()))
            .map(normalize_path)
    }
}

/// Move an entity under a new parent and give it `target_slug` there.
///
/// Three separately committed steps: park the entity under a temporary
/// slug that cannot collide, move it, then set the final slug. `entity` is
/// refreshed from the store afterwards. The new parent's child count is
/// repaired first, as an interrupted move can leave it wrong.
pub fn relocate(
    store: &dyn EntityStore,
    entity: &mut Entity,
    parent_id: i64,
    target_slug: &str,
) -> Result<(), StoreError> {
    let id = entity
        .id
        .ok_or_else(|| StoreError::integrity("cannot move an unsaved entity"))?;

    entity.slug = uuid::Uuid::new_v4().to_string();
    store.save(entity)?;

    store.repair_child_count(parent_id)?;
    store.move_to(id, parent_id, Position::LastChild)?;

    let kind = entity.kind.clone();
    *entity = store
        .get(id)?
        .ok_or_else(|| StoreError::not_found(kind, "id", id))?;
    entity.slug = target_slug.to_string();
    store.save(entity)
}

/// How an import places the pages it creates.
#[derive(Debug, Clone, Default)]
pub struct PagePlacement {
    parent_kind: Option<String>,
    parent_id: Option<i64>,
    finder: Option<String>,
    move_existing: bool,
}

impl PagePlacement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages without a findable ideal parent go under the first entity of
    /// this kind.
    pub fn parent_kind(mut self, kind: impl Into<String>) -> Self {
        self.parent_kind = Some(kind.into());
        self
    }

    /// Use this entity as the default parent instead of the first of
    /// `parent_kind`.
    pub fn parent_id(mut self, id: i64) -> Self {
        self.parent_id = Some(id);
        self
    }

    /// Resolve ideal parent paths through the named finder.
    pub fn finder(mut self, name: impl Into<String>) -> Self {
        self.finder = Some(name.into());
        self
    }

    /// Move existing pages that are not under their ideal parent.
    pub fn move_existing(mut self, enabled: bool) -> Self {
        self.move_existing = enabled;
        self
    }

    pub(crate) fn check(&self, finders: &FinderRegistry) -> Result<(), ImportError> {
        match &self.finder {
            Some(name) if !finders.contains(name) => Err(ImportError::UnknownFinder(name.clone())),
            _ => Ok(()),
        }
    }

    /// The configured parent, else the first entity of the parent kind,
    /// else the default site's root.
    pub fn default_parent(&self, store: &dyn EntityStore) -> Result<Entity, ImportError> {
        if let Some(id) = self.parent_id {
            return store
                .get(id)?
                .ok_or_else(|| ImportError::NoDefaultParent(format!("no entity with id {}", id)));
        }
        if let Some(kind) = &self.parent_kind
            && let Some(parent) = store.query(&Filter::kinds([kind.as_str()]))?.into_iter().next()
        {
            return Ok(parent);
        }
        let sites = store.sites()?;
        let Some(site) = sites.iter().find(|s| s.is_default) else {
            return Err(ImportError::NoDefaultParent("no default site".into()));
        };
        store
            .get(site.root_id)?
            .ok_or_else(|| ImportError::NoDefaultParent(format!("site root {} is missing", site.root_id)))
    }

    /// The page's ideal parent if it can be found, else the default parent.
    pub fn parent_for(
        &self,
        store: &dyn EntityStore,
        finders: &mut FinderRegistry,
        entity: &Entity,
    ) -> Result<Entity, ImportError> {
        let (Some(ideal), Some(name)) = (IdealPath::of(entity), &self.finder) else {
            return self.default_parent(store);
        };
        let finder = finders
            .get_mut(name)
            .ok_or_else(|| ImportError::UnknownFinder(name.clone()))?;
        match finder.find(store, ideal.parent_path.as_str()) {
            Ok(parent) => Ok(parent),
            Err(e @ (FindError::NotFound { .. } | FindError::ValueNotSupported { .. })) => {
                log::debug!("{}; using the default parent", e);
                self.default_parent(store)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The slug a page should have: its ideal slug, else its current one,
    /// else one made from its title.
    fn base_slug(entity: &Entity) -> String {
        if let Some(ideal) = IdealPath::of(entity) {
            return ideal.slug;
        }
        if !entity.slug.is_empty() {
            return entity.slug.clone();
        }
        let slug = slugify(&entity.title);
        if slug.is_empty() { "page".to_string() } else { slug }
    }

    /// Save a page, placing new pages (and misplaced existing ones, when
    /// enabled) in the tree with a slug unique amongst their siblings.
    pub fn save(
        &self,
        store: &dyn EntityStore,
        finders: &mut FinderRegistry,
        entity: &mut Entity,
    ) -> Result<(), ImportError> {
        let Some(id) = entity.id else {
            let parent = self.parent_for(store, finders, entity)?;
            let parent_id = parent
                .id
                .ok_or_else(|| ImportError::NoDefaultParent("parent is unsaved".into()))?;
            let base = Self::base_slug(entity);
            store.repair_child_count(parent_id)?;
            entity.slug = unique_slug(store, &base, Some(parent_id), None)?;
            store.add_child(parent_id, entity)?;
            log::info!("Created {} at {}", entity.describe(), entity.url_path);
            return Ok(());
        };

        if self.move_existing {
            let parent = self.parent_for(store, finders, entity)?;
            if let Some(parent_id) = parent.id
                && entity.parent_id != Some(parent_id)
            {
                let slug = unique_slug(store, &entity.slug, Some(parent_id), Some(id))?;
                relocate(store, entity, parent_id, &slug)?;
                log::info!("Moved {} to {}", entity.describe(), entity.url_path);
                return Ok(());
            }
        }

        let stored_slug = store.get(id)?.map(|e| e.slug);
        if stored_slug.as_deref() != Some(entity.slug.as_str()) {
            entity.slug = unique_slug(store, &entity.slug, entity.parent_id, Some(id))?;
        }
        store.save(entity)?;
        Ok(())
    }
}
