//! Row cleaning for legacy imports.
//!
//! A [`FieldSet`] holds one [`Field`] per target attribute. Each field pulls
//! its raw value out of the source row, converts and validates it, and
//! decides through its [`Strategy`] slots what happens when the value is
//! missing, empty, invalid or cannot be resolved. Fields run cheapest first
//! so rows that fail early never reach downloads.
//!
//! Structured values are cleaned by fields made of other fields:
//! [`ListField`] for lists of items, [`BlockField`] for typed content blocks
//! and [`RichTextField`] for markup whose links resolve through the run's
//! finders.

pub mod block;
pub mod error;
pub mod fetch;
pub mod field;
pub mod file;
pub mod html;
pub mod imaging;
pub mod list;
pub mod reference;
pub mod richtext;
pub mod storage;
pub mod strategy;
pub mod typed;
pub mod values;

pub use block::BlockField;
pub use error::{ErrorCode, FieldConfigError, FieldError, RowErrors, ValidationError};
pub use fetch::{FetchError, FileFetcher, FileServices, HttpFetcher, LocalFetcher};
pub use field::{
    CLEAN_COST_HIGH, CLEAN_COST_LOW, CLEAN_COST_MEDIUM, CLEAN_COST_MEDIUM_HIGH,
    CLEAN_COST_MEDIUM_LOW, CleanContext, CleanedRow, Fallback, Field, FieldBase, FieldBuilder,
    FieldSet,
};
pub use file::{FileField, FileFieldBuilder, ImageField};
pub use html::{AllowListSanitizer, HtmlField, HtmlSanitizer, Tidy};
pub use list::ListField;
pub use reference::{
    DownloadedImageFactory, MappedReferenceField, PlaceholderFactory, ReferenceField,
};
pub use richtext::{
    FootnotesField, LinkMatchError, LinkRewriter, ParsedRichText, RichTextField, footnote_uuid,
};
pub use storage::{DirectoryStorage, FileStorage};
pub use strategy::{FieldDefaults, Strategy, StrategyCode};
pub use typed::{
    BooleanField, DateField, DateTimeField, FloatField, IntegerField, TextField, UuidField,
    ValueField,
};
pub use values::{ValueExtractionError, extract_value};
