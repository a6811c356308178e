//! Entity resolution for legacy references.
//!
//! A [`Finder`] turns a raw legacy value (an id, a path, a file URL) into the
//! already-migrated entity it refers to. Each finder tries its
//! [`LookupOption`]s in declaration order, skipping those that could not
//! possibly match the value, and caches results under every equivalent
//! representation of the value it saw.

pub mod error;
pub mod finder;
pub mod option;
pub mod options;
pub mod value;

pub use error::{ConfigError, FindError, LookupValueError};
pub use finder::{Finder, FinderRegistry, user_finder};
pub use option::{BindContext, LookupOption, Patterns};
pub use options::{
    FieldOption, FilenameOption, LegacyPathOption, OnMultiple, ResolveFn, RoutableUrlOption,
};
pub use value::LookupValue;
