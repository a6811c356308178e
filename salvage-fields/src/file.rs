//! File and image fields.
//!
//! Both download the legacy file during `clean`, check it, and hand it to the
//! run's [`FileStorage`](crate::FileStorage). The cleaned value is an object
//! `{path, hash[, width, height]}` which `update_entity` spreads over the
//! target attribute and its `_hash`, `_width` and `_height` companions.

use image::ImageFormat;
use salvage_core::{Entity, StoreError, filename_from_url};
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};

use crate::error::{ErrorCode, FieldConfigError, FieldError, ValidationError};
use crate::fetch::{FileServices, fetch_with_retries};
use crate::field::{CLEAN_COST_HIGH, CleanContext, Field, FieldBase};
use crate::imaging;
use crate::strategy::{
    DOWNLOAD_ERROR, EXTENSION_INVALID, FILE_INVALID, FieldDefaults, IMAGE_EXTENSION_INVALID,
    MAX_DIMENSIONS_EXCEEDED, Strategy, StrategySlot,
};

pub const DEFAULT_MAX_FILESIZE: u64 = 30 * 1024 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "gif", "png", "webp"];

// ── Shared file rules ───────────────────────────────────────────────────────

/// Download and acceptance rules common to file and image fields.
#[derive(Debug, Clone)]
pub struct FileRules {
    path_replacements: Vec<(String, String)>,
    allowed_extensions: Vec<String>,
    max_filesize: u64,
    max_retries: u32,
    on_download_error: StrategySlot,
    on_file_invalid: StrategySlot,
    on_extension_invalid: StrategySlot,
}

impl FileRules {
    fn new() -> Self {
        Self {
            path_replacements: Vec::new(),
            allowed_extensions: Vec::new(),
            max_filesize: DEFAULT_MAX_FILESIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            on_download_error: StrategySlot::new("on_download_error", DOWNLOAD_ERROR),
            on_file_invalid: StrategySlot::new("on_file_invalid", FILE_INVALID),
            on_extension_invalid: StrategySlot::new("on_extension_invalid", EXTENSION_INVALID),
        }
    }

    fn url(&self, value: &Value) -> String {
        let mut url = match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        for (from, to) in &self.path_replacements {
            url = url.replace(from.as_str(), to);
        }
        url
    }

    fn extension_allowed(&self, name: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        self.allowed_extensions.iter().any(|a| *a == ext)
    }

    fn file_invalid(&self, defaults: &FieldDefaults) -> Strategy {
        self.on_file_invalid
            .resolve(defaults.on_file_invalid.as_ref(), Strategy::Raise)
    }

    /// Falls back to the file-invalid strategy when not configured.
    fn extension_invalid(&self, defaults: &FieldDefaults) -> Strategy {
        self.on_extension_invalid.resolve(
            defaults.on_extension_invalid.as_ref(),
            self.file_invalid(defaults),
        )
    }

    fn extension_error(&self, name: &str) -> ValidationError {
        ValidationError::new(
            ErrorCode::InvalidExtension,
            format!(
                "The file '{}' does not have an allowed extension ({}).",
                name,
                self.allowed_extensions.join(", ")
            ),
        )
    }
}

/// Builder methods shared by [`FileField`] and [`ImageField`].
pub trait FileFieldBuilder: Sized {
    fn rules_mut(&mut self) -> &mut FileRules;
    fn field_name(&self) -> &str;

    /// Substitute `from` with `to` in source URLs before fetching.
    fn file_path_replace(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rules_mut()
            .path_replacements
            .push((from.into(), to.into()));
        self
    }

    fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules_mut().allowed_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    fn max_filesize(mut self, bytes: u64) -> Self {
        self.rules_mut().max_filesize = bytes;
        self
    }

    fn max_retries(mut self, retries: u32) -> Self {
        self.rules_mut().max_retries = retries;
        self
    }

    fn on_download_error(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        let name = self.field_name().to_string();
        self.rules_mut().on_download_error.set(&name, strategy)?;
        Ok(self)
    }

    fn on_file_invalid(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        let name = self.field_name().to_string();
        self.rules_mut().on_file_invalid.set(&name, strategy)?;
        Ok(self)
    }

    fn on_extension_invalid(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        let name = self.field_name().to_string();
        self.rules_mut().on_extension_invalid.set(&name, strategy)?;
        Ok(self)
    }
}

/// A fetched file on its way to storage.
struct Download {
    url: String,
    name: String,
    bytes: Vec<u8>,
    dimensions: Option<(u32, u32)>,
}

/// Either a file to carry on with, or the value a strategy chose instead.
enum Step<T> {
    Continue(T),
    Replaced(Value),
}

fn services<'a>(base: &FieldBase, ctx: &CleanContext<'a>) -> Result<&'a FileServices, FieldError> {
    ctx.files.ok_or_else(|| {
        FieldConfigError::NoFileServices {
            field: base.name.clone(),
        }
        .into()
    })
}

/// Fetch the file and apply the size ceiling.
fn download(
    base: &FieldBase,
    rules: &FileRules,
    value: &Value,
    ctx: &CleanContext<'_>,
) -> Result<Step<Download>, FieldError> {
    let url = rules.url(value);
    let files = services(base, ctx)?;
    let bytes = match fetch_with_retries(files.fetcher.as_ref(), &url, rules.max_retries) {
        Ok(bytes) => bytes,
        Err(e) => {
            let strategy = rules
                .on_download_error
                .resolve(ctx.defaults.on_download_error.as_ref(), Strategy::Raise);
            let error = ValidationError::new(
                ErrorCode::DownloadError,
                format!("The file '{}' could not be downloaded: {}", url, e),
            );
            return base.recover(strategy, value, error).map(Step::Replaced);
        }
    };

    let size = bytes.len() as u64;
    if size > rules.max_filesize {
        let error = ValidationError::new(
            ErrorCode::MaxFilesizeExceeded,
            format!(
                "The file is {} bytes, which exceeds the {} byte limit.",
                size, rules.max_filesize
            ),
        );
        return base
            .recover(rules.file_invalid(ctx.defaults), value, error)
            .map(Step::Replaced);
    }

    Ok(Step::Continue(Download {
        name: filename_from_url(&url),
        url,
        bytes,
        dimensions: None,
    }))
}

/// Hash and store a checked file, unless the current entity already holds
/// the same content.
fn finish(
    base: &FieldBase,
    download: Download,
    ctx: &CleanContext<'_>,
) -> Result<Value, FieldError> {
    let target = base.target();
    let hash = format!("{:x}", Sha1::digest(&download.bytes));

    let existing = ctx.current.and_then(|entity| {
        let stored_hash = entity.attr_str(&format!("{}_hash", target))?;
        let path = entity.attr_str(target).filter(|p| !p.is_empty())?;
        (stored_hash == hash).then_some(path)
    });
    let path = match existing {
        Some(path) => {
            log::debug!("Field '{}': '{}' is unchanged, keeping {}", base.name, download.url, path);
            path
        }
        None => services(base, ctx)?
            .storage
            .save(&download.name, &download.bytes)
            .map_err(StoreError::from)?,
    };

    let mut file = Map::new();
    file.insert("path".into(), Value::String(path));
    file.insert("hash".into(), Value::String(hash));
    if let Some((width, height)) = download.dimensions {
        file.insert("width".into(), json!(width));
        file.insert("height".into(), json!(height));
    }
    Ok(Value::Object(file))
}

/// Spread a cleaned file value over the entity.
fn unpack(target: &str, cleaned: &Map<String, Value>, entity: &mut Entity) {
    match cleaned.get(target) {
        Some(Value::Object(file)) => {
            for (key, attr) in [
                ("path", target.to_string()),
                ("hash", format!("{}_hash", target)),
                ("width", format!("{}_width", target)),
                ("height", format!("{}_height", target)),
            ] {
                if let Some(value) = file.get(key) {
                    entity.set_attr(&attr, value.clone());
                }
            }
        }
        Some(other) => entity.set_attr(target, other.clone()),
        None => {}
    }
}

// ── FileField ───────────────────────────────────────────────────────────────

pub struct FileField {
    base: FieldBase,
    rules: FileRules,
}

impl FileField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_HIGH),
            rules: FileRules::new(),
        }
    }
}

impl FileFieldBuilder for FileField {
    fn rules_mut(&mut self) -> &mut FileRules {
        &mut self.rules
    }

    fn field_name(&self) -> &str {
        &self.base.name
    }
}

impl Field for FileField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let download = match download(&self.base, &self.rules, &value, ctx)? {
            Step::Continue(d) => d,
            Step::Replaced(v) => return Ok(v),
        };
        if !self.rules.extension_allowed(&download.name) {
            let error = self.rules.extension_error(&download.name);
            return self
                .base
                .recover(self.rules.extension_invalid(ctx.defaults), &value, error);
        }
        finish(&self.base, download, ctx)
    }

    fn update_entity(&self, entity: &mut Entity, cleaned: &Map<String, Value>, _is_new: bool) {
        unpack(self.base.target(), cleaned, entity);
    }
}

// ── ImageField ──────────────────────────────────────────────────────────────

/// A file field that only accepts decodable images, with optional
/// dimension limits and WebP conversion.
pub struct ImageField {
    base: FieldBase,
    rules: FileRules,
    max_width: Option<u32>,
    max_height: Option<u32>,
    on_max_dimensions_exceeded: StrategySlot,
    shrink_by_default: bool,
    convert_to_webp: bool,
}

impl ImageField {
    pub fn new(name: impl Into<String>) -> Self {
        let mut rules = FileRules::new();
        rules.allowed_extensions = IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        rules.on_extension_invalid =
            StrategySlot::new("on_extension_invalid", IMAGE_EXTENSION_INVALID);
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_HIGH),
            rules,
            max_width: None,
            max_height: None,
            on_max_dimensions_exceeded: StrategySlot::new(
                "on_max_dimensions_exceeded",
                MAX_DIMENSIONS_EXCEEDED,
            ),
            shrink_by_default: false,
            convert_to_webp: false,
        }
    }

    /// The URL fetched for `value`, after path replacements.
    pub fn source_url(&self, value: &Value) -> String {
        self.rules.url(value)
    }

    pub fn max_width(mut self, width: u32) -> Self {
        self.max_width = Some(width);
        self
    }

    pub fn max_height(mut self, height: u32) -> Self {
        self.max_height = Some(height);
        self
    }

    pub fn on_max_dimensions_exceeded(
        mut self,
        strategy: Strategy,
    ) -> Result<Self, FieldConfigError> {
        self.on_max_dimensions_exceeded
            .set(&self.base.name, strategy)?;
        Ok(self)
    }

    /// Fit oversized images within the given bounds unless another
    /// dimension strategy is set explicitly.
    pub fn shrink_to_fit(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = Some(max_width);
        self.max_height = Some(max_height);
        self.shrink_by_default = true;
        self
    }

    /// Re-encode every accepted image as WebP.
    pub fn convert_to_webp(mut self) -> Self {
        self.convert_to_webp = true;
        self
    }

    fn dimension_error(&self, width: u32, height: u32) -> Option<ValidationError> {
        if let Some(max) = self.max_width
            && width > max
        {
            return Some(ValidationError::new(
                ErrorCode::MaxWidthExceeded,
                format!("The image is {} pixels wide, which exceeds the {} pixel limit.", width, max),
            ));
        }
        if let Some(max) = self.max_height
            && height > max
        {
            return Some(ValidationError::new(
                ErrorCode::MaxHeightExceeded,
                format!("The image is {} pixels tall, which exceeds the {} pixel limit.", height, max),
            ));
        }
        None
    }

    /// Decode, check and (when needed) re-encode a downloaded image.
    fn process(
        &self,
        mut download: Download,
        value: &Value,
        ctx: &CleanContext<'_>,
    ) -> Result<Step<Download>, FieldError> {
        let mut to_webp = self.convert_to_webp;
        if !self.rules.extension_allowed(&download.name) {
            match self.rules.extension_invalid(ctx.defaults) {
                Strategy::ConvertToWebp => to_webp = true,
                strategy => {
                    let error = self.rules.extension_error(&download.name);
                    return self.base.recover(strategy, value, error).map(Step::Replaced);
                }
            }
        }

        let decoded = match imaging::decode(&download.bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                let error = ValidationError::invalid(format!(
                    "The file '{}' is not a valid image: {}",
                    download.name, e
                ));
                return self
                    .base
                    .recover(self.rules.file_invalid(ctx.defaults), value, error)
                    .map(Step::Replaced);
            }
        };

        let mut image = decoded.image;
        let mut reencode = to_webp || matches!(decoded.format, ImageFormat::Tiff | ImageFormat::Bmp);
        if let Some(error) = self.dimension_error(image.width(), image.height()) {
            let class_default = if self.shrink_by_default {
                Strategy::ShrinkImage
            } else {
                Strategy::Raise
            };
            match self.on_max_dimensions_exceeded.resolve(None, class_default) {
                Strategy::ShrinkImage => {
                    log::debug!(
                        "Field '{}': shrinking {} ({}x{})",
                        self.base.name,
                        download.name,
                        image.width(),
                        image.height()
                    );
                    image = imaging::shrink(&image, self.max_width, self.max_height);
                    reencode = true;
                }
                _ => return Err(error.into()),
            }
        }

        if reencode {
            let format = imaging::target_format(decoded.format, to_webp);
            download.bytes = imaging::encode(&image, format).map_err(|e| {
                ValidationError::invalid(format!("The image could not be re-encoded: {}", e))
            })?;
            download.name = imaging::with_extension(&download.name, imaging::extension(format));
        }
        download.dimensions = Some((image.width(), image.height()));
        Ok(Step::Continue(download))
    }
}

impl FileFieldBuilder for ImageField {
    fn rules_mut(&mut self) -> &mut FileRules {
        &mut self.rules
    }

    fn field_name(&self) -> &str {
        &self.base.name
    }
}

impl Field for ImageField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let download = match download(&self.base, &self.rules, &value, ctx)? {
            Step::Continue(d) => d,
            Step::Replaced(v) => return Ok(v),
        };
        match self.process(download, &value, ctx)? {
            Step::Continue(d) => finish(&self.base, d, ctx),
            Step::Replaced(v) => Ok(v),
        }
    }

    fn update_entity(&self, entity: &mut Entity, cleaned: &Map<String, Value>, _is_new: bool) {
        unpack(self.base.target(), cleaned, entity);
    }
}
