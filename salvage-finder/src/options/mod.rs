//! The built-in lookup options.

pub mod field;
pub mod filename;
pub mod path;
pub mod routable;

pub use field::{FieldOption, OnMultiple, ResolveFn};
pub use filename::{FilenameOption, StoredName};
pub use path::LegacyPathOption;
pub use routable::{RoutableUrlOption, candidate_sites};
