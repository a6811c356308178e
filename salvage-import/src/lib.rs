//! Row imports and page-tree fixup.
//!
//! An import reads rows from a [`Reader`] within a [`WindowOptions`] window
//! and hands each to the [`ImportSession`] engine, which locates or creates
//! the matching entity, cleans the row through the [`ImportSpec`]'s fields and saves
//! it. Pages are placed in the tree by [`PagePlacement`]; [`Fixup`] later
//! moves pages whose ideal parents did not exist at import time.

pub mod engine;
pub mod error;
pub mod fixup;
pub mod page;
pub mod progress;
pub mod reader;
pub mod resume;
pub mod settings;

pub use engine::{
    DefaultHooks, ImportOptions, ImportReport, ImportSession, ImportSpec, ImportStats,
    LAST_IMPORTED_AT_ATTR, RowError, RowHooks, source_key,
};
pub use error::ImportError;
pub use fixup::{Fixup, FixupReport, FixupStats, SlugConflict, route_finder};
pub use page::{IdealPath, LEGACY_PATH_ATTR, PagePlacement, SiteRoots, relocate};
pub use progress::{ImportProgress, LogProgress, RowInfo, SilentProgress, humanize_duration};
pub use reader::{
    CsvReader, EntityReader, JsonReader, Page, PageEnd, Pager, ReadWindow, Reader, ReaderError,
    SqlReader, WindowError, WindowOptions, sanitize_cell,
};
pub use resume::{RESUME_KEY_PREFIX, ResumeCheckpoint, resume_key};
pub use settings::{
    FixupSettings, HostSettings, ImportSettings, Settings, load_settings, load_settings_from,
    save_settings, save_settings_to, settings_path,
};
