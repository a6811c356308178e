use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage};
use salvage_core::{
    Entity, EntityStore, EntityType, FieldDescriptor, FieldKind, Filter, LegacyHosts, Schema,
};
use salvage_db::SqliteStore;
use salvage_fields::imaging;
use salvage_fields::{
    BlockField, CleanContext, CleanedRow, DirectoryStorage, DownloadedImageFactory, ErrorCode,
    FieldConfigError, FieldDefaults, FieldError, FieldSet, FieldBuilder, FileField,
    FileFieldBuilder, FileServices, FootnotesField, ImageField, IntegerField, BooleanField,
    LinkMatchError, LinkRewriter, ListField, LocalFetcher, MappedReferenceField, ReferenceField,
    RichTextField, Strategy, TextField, DateField, footnote_uuid,
};
use salvage_finder::{FieldOption, FilenameOption, Finder, FinderRegistry, RoutableUrlOption};
use serde_json::{Value, json};
use tempfile::TempDir;

// ── Fixtures ────────────────────────────────────────────────────────────────

fn schema() -> Schema {
    Schema::new()
        .with(EntityType::new("page").field(FieldDescriptor::new("legacy_path", FieldKind::Text)))
        .unwrap()
        .with(EntityType::new("document").field(FieldDescriptor::new("file", FieldKind::File)))
        .unwrap()
        .with(
            EntityType::new("image")
                .field(FieldDescriptor::new("file", FieldKind::File))
                .field(FieldDescriptor::new("legacy_path", FieldKind::Text))
                .legacy_id(FieldDescriptor::new("legacy_id", FieldKind::Integer)),
        )
        .unwrap()
}

struct Env {
    store: SqliteStore,
    finders: FinderRegistry,
    files: FileServices,
    defaults: FieldDefaults,
    media: TempDir,
    storage: TempDir,
}

impl Env {
    fn new() -> Self {
        let schema = schema();
        let hosts = LegacyHosts::new(["example.com"], ["media.example.com"]);
        let finders = FinderRegistry::new()
            .with(
                "images",
                Finder::new(
                    &schema,
                    &hosts,
                    "image",
                    vec![
                        Box::new(FieldOption::legacy_id()),
                        Box::new(FilenameOption::new("file")),
                    ],
                )
                .unwrap(),
            );
        let media = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let files = FileServices::new(
            LocalFetcher::new(media.path()),
            DirectoryStorage::new(storage.path()).subdir("images"),
        );
        Self {
            store: SqliteStore::open_memory().unwrap(),
            finders,
            files,
            defaults: FieldDefaults::default(),
            media,
            storage,
        }
    }

    fn clean(&mut self, fields: &FieldSet, row: &Value, current: Option<&Entity>) -> Result<CleanedRow, FieldError> {
        let mut ctx = CleanContext {
            store: &self.store,
            finders: &mut self.finders,
            files: Some(&self.files),
            defaults: &self.defaults,
            row,
            current,
        };
        fields.clean_row(&mut ctx)
    }

    /// Put an image of the given size in the legacy media tree.
    fn add_media(&self, path: &str, width: u32, height: u32, format: ImageFormat) {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let bytes = imaging::encode(&image, format).unwrap();
        let full = self.media.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, bytes).unwrap();
    }

    fn stored_files(&self) -> usize {
        count_files(&self.storage.path().join("images"))
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn set(field: impl salvage_fields::Field + 'static) -> FieldSet {
    FieldSet::new().with(field)
}

// ── Missing value strategies ────────────────────────────────────────────────

#[test]
fn required_fields_only_raise() {
    assert!(matches!(
        IntegerField::new("count").on_missing_value(Strategy::SkipField),
        Err(FieldConfigError::RedundantForRequired { .. })
    ));
    assert!(matches!(
        IntegerField::new("count").fallback(1),
        Err(FieldConfigError::RedundantForRequired { .. })
    ));
    assert!(matches!(
        TextField::new("title").fallback("x").unwrap().required(),
        Err(FieldConfigError::RedundantForRequired { option: "fallback", .. })
    ));
    assert!(matches!(
        TextField::new("title")
            .on_empty_value(Strategy::SkipRow)
            .unwrap()
            .required(),
        Err(FieldConfigError::RedundantForRequired { option: "on_empty_value", .. })
    ));
    assert!(TextField::new("title").required().is_ok());
}

#[test]
fn missing_value_outcomes() {
    let mut env = Env::new();
    let row = json!({"other": 1});

    let cleaned = env.clean(&set(IntegerField::new("count")), &row, None).unwrap();
    assert_eq!(cleaned.errors.get("count").unwrap()[0].code, ErrorCode::ValueMissing);
    assert!(!cleaned.data.contains_key("count"));

    let cleaned = env.clean(&set(IntegerField::new("count").optional()), &row, None).unwrap();
    assert_eq!(cleaned.data["count"], Value::Null);

    let field = IntegerField::new("count").optional().fallback(5).unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(cleaned.data["count"], json!(5));

    let field = IntegerField::new("count")
        .optional()
        .on_missing_value(Strategy::SkipField)
        .unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert!(cleaned.data.is_empty());
    assert!(cleaned.errors.is_empty());

    let field = IntegerField::new("count")
        .optional()
        .on_missing_value(Strategy::SkipRow)
        .unwrap();
    assert!(matches!(env.clean(&set(field), &row, None), Err(FieldError::SkipRow)));

    let field = IntegerField::new("count")
        .optional()
        .on_missing_value(Strategy::custom(|v| Ok(json!(if v.is_none() { "absent" } else { "empty" }))))
        .unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(cleaned.data["count"], json!("absent"));

    let field = IntegerField::new("count")
        .optional()
        .on_missing_value(Strategy::Raise)
        .unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(cleaned.errors.len(), 1);
}

#[test]
fn command_defaults_apply_unless_overridden() {
    let mut env = Env::new();
    env.defaults.on_missing_value = Some(Strategy::SkipField);
    let row = json!({});

    let fields = FieldSet::new()
        .with(TextField::new("summary"))
        .with(
            TextField::new("title")
                .on_missing_value(Strategy::UseFallback)
                .unwrap(),
        );
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert!(!cleaned.data.contains_key("summary"));
    assert_eq!(cleaned.data["title"], json!(""));
}

#[test]
fn empty_values_use_fallback_on_optional_fields() {
    let mut env = Env::new();
    let field = TextField::new("title").fallback("Untitled").unwrap();
    let cleaned = env.clean(&set(field), &json!({"title": "NULL"}), None).unwrap();
    assert_eq!(cleaned.data["title"], json!("Untitled"));

    let cleaned = env
        .clean(&set(BooleanField::new("flag")), &json!({"flag": ""}), None)
        .unwrap();
    assert_eq!(cleaned.errors.get("flag").unwrap()[0].code, ErrorCode::ValueEmpty);
}

// ── Row cleaning ────────────────────────────────────────────────────────────

#[test]
fn errors_accumulate_per_field() {
    let mut env = Env::new();
    let fields = FieldSet::new()
        .with(TextField::new("title"))
        .with(IntegerField::new("count"))
        .with(BooleanField::new("flag"));
    let row = json!({"title": "  Hello%20world ", "count": "abc", "flag": "maybe"});

    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert_eq!(cleaned.data["title"], json!("Hello world"));
    assert_eq!(cleaned.errors.len(), 2);
    assert_eq!(cleaned.errors.get("count").unwrap()[0].code, ErrorCode::Incoercible);
    assert!(!cleaned.data.contains_key("count"));
    assert!(!cleaned.data.contains_key("flag"));
}

#[test]
fn cheaper_fields_run_first() {
    let fields = FieldSet::new()
        .with(ImageField::new("photo"))
        .with(ReferenceField::new("author", "images"))
        .with(TextField::new("title"))
        .with(IntegerField::new("count"));
    assert_eq!(fields.names(), vec!["title", "count", "author", "photo"]);
}

#[test]
fn text_max_length() {
    let mut env = Env::new();
    let row = json!({"title": "Hello world"});

    let cleaned = env
        .clean(&set(TextField::new("title").max_length(5)), &row, None)
        .unwrap();
    assert_eq!(
        cleaned.errors.get("title").unwrap()[0].code,
        ErrorCode::MaxLengthExceeded
    );

    let field = TextField::new("title")
        .max_length(5)
        .on_max_length_exceeded(Strategy::TrimToFit)
        .unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(cleaned.data["title"], json!("Hello"));

    assert!(
        TextField::new("title")
            .on_max_length_exceeded(Strategy::SkipRow)
            .is_err()
    );
}

#[test]
fn text_strip_html_and_dates() {
    let mut env = Env::new();
    let fields = FieldSet::new()
        .with(TextField::new("body").strip_html().strip_line_breaks())
        .with(DateField::new("published"))
        .with(DateField::new("updated").source("meta.updated"));
    let row = json!({
        "body": "<p>Fish &amp; chips<br>today</p>\n",
        "published": 86400,
        "meta": {"updated": "sometime"},
    });
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert_eq!(cleaned.data["body"], json!("Fish & chips today"));
    assert_eq!(cleaned.data["published"], json!("1970-01-02"));
    assert_eq!(cleaned.data["updated"], Value::Null);
}

#[test]
fn validators_run_after_cleaning() {
    let mut env = Env::new();
    let field = IntegerField::new("count").validator(|v| {
        if v.as_i64().unwrap_or_default() < 0 {
            return Err(salvage_fields::ValidationError::invalid("Must not be negative."));
        }
        Ok(())
    });
    let fields = set(field);
    assert!(env.clean(&fields, &json!({"count": "3"}), None).unwrap().errors.is_empty());
    let cleaned = env.clean(&fields, &json!({"count": "-3"}), None).unwrap();
    assert_eq!(cleaned.errors.get("count").unwrap()[0].code, ErrorCode::Invalid);
}

// ── Lists ───────────────────────────────────────────────────────────────────

#[test]
fn flatten_needs_one_sub_field() {
    assert!(matches!(
        ListField::new("tags").flatten(),
        Err(FieldConfigError::FlattenNeedsOneSubField { count: 0, .. })
    ));
    assert!(
        ListField::new("tags")
            .sub_field(TextField::new("a"))
            .sub_field(TextField::new("b"))
            .flatten()
            .is_err()
    );

    // Sub-fields added after flattening are caught at bind time.
    let env = Env::new();
    let tags = ListField::new("tags")
        .sub_field(TextField::new("a"))
        .flatten()
        .unwrap()
        .sub_field(TextField::new("b"));
    assert!(matches!(
        set(tags).bind(&env.finders, &env.defaults),
        Err(FieldConfigError::FlattenNeedsOneSubField { count: 2, .. })
    ));
}

#[test]
fn list_items_are_cleaned_individually() {
    let mut env = Env::new();
    let tags = ListField::new("tags")
        .sub_field(TextField::new("name").required().unwrap())
        .flatten()
        .unwrap();
    let cleaned = env
        .clean(&set(tags), &json!({"tags": [{"name": "a"}, {"name": " b "}]}), None)
        .unwrap();
    assert_eq!(cleaned.data["tags"], json!(["a", "b"]));

    let items = ListField::new("items").sub_field(
        IntegerField::new("n")
            .optional()
            .on_missing_value(Strategy::SkipRow)
            .unwrap(),
    );
    let fields = set(items);
    let cleaned = env
        .clean(&fields, &json!({"items": [{"n": "1"}, {}, {"n": 2}]}), None)
        .unwrap();
    assert_eq!(cleaned.data["items"], json!([{"n": 1}, {"n": 2}]));

    let cleaned = env
        .clean(&fields, &json!({"items": [{"n": "x"}]}), None)
        .unwrap();
    assert_eq!(cleaned.errors.get("items").unwrap()[0].code, ErrorCode::Invalid);

    let cleaned = env.clean(&fields, &json!({"items": {"n": 7}}), None).unwrap();
    assert_eq!(cleaned.data["items"], json!([{"n": 7}]));
}

// ── References ──────────────────────────────────────────────────────────────

fn save_image(store: &SqliteStore, file: &str, legacy_id: i64) -> Entity {
    let mut image = Entity::new("image")
        .with_title(file)
        .with_attr("file", file)
        .with_attr("legacy_id", legacy_id);
    store.save(&mut image).unwrap();
    image
}

#[test]
fn reference_resolves_to_entity_id() {
    let mut env = Env::new();
    let image = save_image(&env.store, "images/photo.jpg", 6);
    let fields = set(ReferenceField::new("hero", "images"));

    let cleaned = env.clean(&fields, &json!({"hero": "06"}), None).unwrap();
    assert_eq!(cleaned.data["hero"], json!(image.id.unwrap()));

    let cleaned = env
        .clean(&fields, &json!({"hero": "https://media.example.com/legacy/photo.jpg"}), None)
        .unwrap();
    assert_eq!(cleaned.data["hero"], json!(image.id.unwrap()));

    let cleaned = env.clean(&fields, &json!({"hero": 99}), None).unwrap();
    let errors = cleaned.errors.get("hero").unwrap();
    assert_eq!(errors[0].code, ErrorCode::ObjectNotFound);
    assert_eq!(errors[0].message, "No object could be found matching the value '99'.");
}

#[test]
fn reference_not_found_strategies() {
    let mut env = Env::new();
    let row = json!({"hero": 99});

    let field = ReferenceField::new("hero", "images")
        .optional()
        .fallback(0)
        .unwrap()
        .on_not_found(Strategy::UseFallback)
        .unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(cleaned.data["hero"], json!(0));

    env.defaults.on_not_found = Some(Strategy::SkipField);
    let cleaned = env
        .clean(&set(ReferenceField::new("hero", "images")), &row, None)
        .unwrap();
    assert!(cleaned.data.is_empty());
    assert!(cleaned.errors.is_empty());
}

#[test]
fn reference_binding_checks_configuration() {
    let env = Env::new();
    let mut fields = set(ReferenceField::new("hero", "missing"));
    assert!(matches!(
        fields.bind(&env.finders, &env.defaults),
        Err(FieldConfigError::UnknownFinder { .. })
    ));

    let mut fields = set(
        ReferenceField::new("hero", "images")
            .on_not_found(Strategy::AttemptCreate)
            .unwrap(),
    );
    assert!(matches!(
        fields.bind(&env.finders, &env.defaults),
        Err(FieldConfigError::NoPlaceholderFactory { .. })
    ));
}

#[test]
fn command_default_attempt_create_needs_a_factory() {
    let mut env = Env::new();
    env.defaults.on_not_found = Some(Strategy::AttemptCreate);
    let mut fields = set(ReferenceField::new("hero", "images"));
    assert!(matches!(
        fields.bind(&env.finders, &env.defaults),
        Err(FieldConfigError::NoPlaceholderFactory { .. })
    ));

    let mut fields = set(
        ReferenceField::new("hero", "images")
            .on_not_found(Strategy::Raise)
            .unwrap(),
    );
    assert!(fields.bind(&env.finders, &env.defaults).is_ok());
}

#[test]
fn attempt_create_downloads_once() {
    let mut env = Env::new();
    env.add_media("uploads/new.png", 40, 20, ImageFormat::Png);
    let mut fields = set(
        ReferenceField::new("hero", "images")
            .on_not_found(Strategy::AttemptCreate)
            .unwrap()
            .placeholder(DownloadedImageFactory::new("image").title_from("caption")),
    );
    fields.bind(&env.finders, &env.defaults).unwrap();

    let row = json!({"hero": "https://media.example.com/uploads/new.png", "caption": "A new image"});
    let first = env.clean(&fields, &row, None).unwrap();
    assert!(first.errors.is_empty());
    let id = first.data["hero"].as_i64().unwrap();

    let created = env.store.get(id).unwrap().unwrap();
    assert_eq!(created.title, "A new image");
    assert_eq!(created.attr_str("file").as_deref(), Some("images/new.png"));
    assert_eq!(created.attr("file_width"), Some(json!(40)));
    assert!(created.attr_str("file_hash").is_some());

    let row = json!({"hero": "https://media.example.com/uploads/new.png"});
    let second = env.clean(&fields, &row, None).unwrap();
    assert_eq!(second.data["hero"], json!(id));
    assert_eq!(env.store.query(&Filter::kinds(["image"])).unwrap().len(), 1);
    assert_eq!(env.stored_files(), 1);
}

#[test]
fn created_placeholders_for_unsupported_urls_are_reused() {
    let mut env = Env::new();
    env.add_media("uploads/new.png", 40, 20, ImageFormat::Png);
    let mut fields = set(
        ReferenceField::new("hero", "images")
            .on_not_found(Strategy::AttemptCreate)
            .unwrap()
            .placeholder(
                DownloadedImageFactory::new("image").file_path_replace("/old-uploads/", "/uploads/"),
            ),
    );
    fields.bind(&env.finders, &env.defaults).unwrap();

    // Not a media host, so no lookup option supports the value.
    let row = json!({"hero": "https://cdn.other.org/old-uploads/new.png"});
    let first = env.clean(&fields, &row, None).unwrap();
    assert!(first.errors.is_empty());
    let id = first.data["hero"].as_i64().unwrap();
    let created = env.store.get(id).unwrap().unwrap();
    assert_eq!(created.attr_str("legacy_path").as_deref(), Some("/uploads/new.png"));

    let second = env.clean(&fields, &row, None).unwrap();
    assert_eq!(second.data["hero"], json!(id));

    // The rewritten URL is cached as well.
    let row = json!({"hero": "https://cdn.other.org/uploads/new.png"});
    let third = env.clean(&fields, &row, None).unwrap();
    assert_eq!(third.data["hero"], json!(id));

    assert_eq!(env.store.query(&Filter::kinds(["image"])).unwrap().len(), 1);
    assert_eq!(env.stored_files(), 1);
}

#[test]
fn mapped_reference_loads_once() {
    let mut env = Env::new();
    let image = save_image(&env.store, "images/a.jpg", 6);
    let fields = set(MappedReferenceField::new("thumb", "image", "legacy_id"));

    let cleaned = env.clean(&fields, &json!({"thumb": "6"}), None).unwrap();
    assert_eq!(cleaned.data["thumb"], json!(image.id.unwrap()));

    // Entities saved after the map was loaded are not seen.
    save_image(&env.store, "images/b.jpg", 7);
    let cleaned = env.clean(&fields, &json!({"thumb": 7}), None).unwrap();
    assert_eq!(cleaned.errors.get("thumb").unwrap()[0].code, ErrorCode::ObjectNotFound);
}

// ── Rich text and blocks ────────────────────────────────────────────────────

/// Ids of the `/about` page and the `report.pdf` document, with the
/// `documents` and `pages` finders registered.
fn setup_links(env: &mut Env) -> (i64, i64) {
    let mut home = Entity::new("page").with_slug("home").with_title("Home");
    env.store.save(&mut home).unwrap();
    env.store
        .add_site("example.com", 80, home.id.unwrap(), true)
        .unwrap();
    let mut about = Entity::new("page").with_slug("about").with_title("About");
    env.store.add_child(home.id.unwrap(), &mut about).unwrap();
    let mut report = Entity::new("document")
        .with_title("Report")
        .with_attr("file", "documents/report.pdf");
    env.store.save(&mut report).unwrap();

    let schema = schema();
    let hosts = LegacyHosts::new(["example.com"], ["media.example.com"]);
    env.finders.register(
        "documents",
        Finder::new(&schema, &hosts, "document", vec![Box::new(FilenameOption::new("file"))]).unwrap(),
    );
    env.finders.register(
        "pages",
        Finder::new(&schema, &hosts, "page", vec![Box::new(RoutableUrlOption::new())]).unwrap(),
    );
    (about.id.unwrap(), report.id.unwrap())
}

#[test]
fn rich_text_links_point_at_entities() {
    let mut env = Env::new();
    let (about, report) = setup_links(&mut env);
    let mut fields = set(RichTextField::new("body"));
    fields.bind(&env.finders, &env.defaults).unwrap();

    let row = json!({"body": concat!(
        r#"<p><b>Read</b> <a href="/about" target="_blank">about us</a>, "#,
        r#"<a href="https://media.example.com/files/report.pdf">the report</a>, "#,
        r#"<a href="/about#team">the team</a>, <a href="/missing">gone</a> and "#,
        r#"<a href="mailto:a@example.com">mail</a>.</p><script>x()</script>"#,
    )});
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert!(cleaned.errors.is_empty());
    assert_eq!(
        cleaned.data["body"],
        json!(format!(
            concat!(
                r#"<p><strong>Read</strong> <a linktype="page" id="{}">about us</a>, "#,
                r#"<a linktype="document" id="{}">the report</a>, "#,
                r#"<a href="/about#team">the team</a>, <a href="/missing">gone</a> and "#,
                r#"<a href="mailto:a@example.com">mail</a>.</p>"#,
            ),
            about, report
        ))
    );
}

#[test]
fn unresolved_links_are_reported_not_raised() {
    let mut env = Env::new();
    setup_links(&mut env);
    let field = RichTextField::new("body");

    let parsed = field
        .parse(r#"<p><a href="/missing">gone</a></p>"#, &env.store, &mut env.finders)
        .unwrap();
    assert_eq!(parsed.html, r#"<p><a href="/missing">gone</a></p>"#);
    assert_eq!(parsed.link_errors.len(), 1);
    assert_eq!(parsed.link_errors[0].url, "/missing");

    // A missing document is not retried as a page.
    let parsed = field
        .parse(r#"<a href="/files/lost.pdf">x</a>"#, &env.store, &mut env.finders)
        .unwrap();
    assert!(matches!(
        parsed.link_errors.as_slice(),
        [LinkMatchError { url, .. }] if url == "/files/lost.pdf"
    ));

    let parsed = field
        .parse(r#"<a href="/www.other.org/page">x</a>"#, &env.store, &mut env.finders)
        .unwrap();
    assert_eq!(parsed.html, r#"<a href="http://www.other.org/page">x</a>"#);
}

#[test]
fn rich_text_needs_its_link_finders() {
    let env = Env::new();
    assert!(matches!(
        set(RichTextField::new("body")).bind(&env.finders, &env.defaults),
        Err(FieldConfigError::UnknownFinder { finder, .. }) if finder == "documents"
    ));
    let field = RichTextField::new("body").links(LinkRewriter::new(None, None));
    assert!(set(field).bind(&env.finders, &env.defaults).is_ok());
}

#[test]
fn footnotes_share_ids_with_their_links() {
    let mut env = Env::new();
    let (about, _) = setup_links(&mut env);
    let fields = FieldSet::new()
        .with(RichTextField::new("body"))
        .with(FootnotesField::new("footnotes"));
    let row = json!({
        "body": r##"<p>Claim<a href="#footnote_123456">1</a></p>"##,
        "footnotes": r#"<ul><li class="footnote" id="footnote_123456">See <a href="/about">about</a></li></ul>"#,
    });
    let cleaned = env.clean(&fields, &row, None).unwrap();

    let id = footnote_uuid("123456").to_string();
    assert_eq!(
        cleaned.data["body"],
        json!(format!(r#"<p>Claim<footnote id="{}">[{}]</footnote></p>"#, id, &id[..6]))
    );
    assert_eq!(
        cleaned.data["footnotes"],
        json!([{"uuid": id, "text": format!(r#"See <a linktype="page" id="{}">about</a>"#, about)}])
    );
}

#[test]
fn blocks_are_cleaned_by_type() {
    let mut env = Env::new();
    let (about, _) = setup_links(&mut env);
    let image = save_image(&env.store, "images/photo.jpg", 6);
    let body = || {
        BlockField::new("body")
            .block("heading", TextField::new("value"))
            .block("rich_text", RichTextField::new("value"))
            .block("image", ReferenceField::new("value", "images"))
            .ignore("advert")
    };
    let mut fields = set(body());
    fields.bind(&env.finders, &env.defaults).unwrap();

    let row = json!({"body": [
        {"type": "heading", "value": " Intro "},
        {"type": "advert", "value": "Buy now"},
        {"type": "rich_text", "value": r#"<p><a href="/about">About</a></p>"#},
        {"type": "image", "value": "6"},
    ]});
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert!(cleaned.errors.is_empty());
    let blocks = cleaned.data["body"].as_array().unwrap();
    let summary: Vec<(&str, Value)> = blocks
        .iter()
        .map(|b| (b["type"].as_str().unwrap(), b["value"].clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("heading", json!("Intro")),
            ("rich_text", json!(format!(r#"<p><a linktype="page" id="{}">About</a></p>"#, about))),
            ("image", json!(image.id.unwrap())),
        ]
    );
    assert!(blocks.iter().all(|b| uuid::Uuid::parse_str(b["id"].as_str().unwrap()).is_ok()));
    assert_ne!(blocks[0]["id"], blocks[1]["id"]);

    let row = json!({"body": [{"type": "carousel", "value": []}]});
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert_eq!(cleaned.errors.get("body").unwrap()[0].code, ErrorCode::Invalid);

    let row = json!({"body": [{"type": "image", "value": "99"}]});
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert!(cleaned.errors.get("body").unwrap()[0].message.contains("Block 0 (image)"));

    let fields = set(body().as_json_string());
    let row = json!({"body": r#"[{"type": "heading", "value": "Hi"}]"#});
    let cleaned = env.clean(&fields, &row, None).unwrap();
    let text = cleaned.data["body"].as_str().unwrap();
    let parsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed[0]["value"], json!("Hi"));
}

// ── Files and images ────────────────────────────────────────────────────────

#[test]
fn oversized_images_raise_or_shrink() {
    let mut env = Env::new();
    env.add_media("big.png", 400, 200, ImageFormat::Png);
    let row = json!({"photo": "/big.png"});

    let cleaned = env
        .clean(&set(ImageField::new("photo").max_width(100)), &row, None)
        .unwrap();
    assert_eq!(
        cleaned.errors.get("photo").unwrap()[0].code,
        ErrorCode::MaxWidthExceeded
    );

    let field = ImageField::new("photo")
        .max_width(100)
        .on_max_dimensions_exceeded(Strategy::ShrinkImage)
        .unwrap();
    let fields = set(field);
    let cleaned = env.clean(&fields, &row, None).unwrap();
    assert_eq!(cleaned.data["photo"]["width"], json!(100));
    assert_eq!(cleaned.data["photo"]["height"], json!(50));

    let mut entity = Entity::new("page");
    fields.update_entity(&mut entity, &cleaned.data, true);
    assert_eq!(entity.attr_str("photo").as_deref(), Some("images/big.png"));
    assert_eq!(entity.attr("photo_height"), Some(json!(50)));
}

#[test]
fn disallowed_extensions_convert_to_webp() {
    let mut env = Env::new();
    env.add_media("pic.png", 8, 8, ImageFormat::Png);
    let row = json!({"photo": "/pic.png"});

    let field = ImageField::new("photo").allowed_extensions(["jpg", "webp"]);
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(
        cleaned.errors.get("photo").unwrap()[0].code,
        ErrorCode::InvalidExtension
    );

    let field = ImageField::new("photo")
        .allowed_extensions(["jpg", "webp"])
        .on_extension_invalid(Strategy::ConvertToWebp)
        .unwrap();
    let cleaned = env.clean(&set(field), &row, None).unwrap();
    assert_eq!(cleaned.data["photo"]["path"], json!("images/pic.webp"));

    assert!(
        FileField::new("doc")
            .on_extension_invalid(Strategy::ConvertToWebp)
            .is_err()
    );
}

#[test]
fn unchanged_files_are_not_stored_again() {
    let mut env = Env::new();
    env.add_media("pic.png", 8, 8, ImageFormat::Png);
    let fields = set(FileField::new("attachment"));
    let row = json!({"attachment": "https://media.example.com/pic.png"});

    let cleaned = env.clean(&fields, &row, None).unwrap();
    let mut entity = Entity::new("page");
    fields.update_entity(&mut entity, &cleaned.data, true);
    assert_eq!(env.stored_files(), 1);

    let again = env.clean(&fields, &row, Some(&entity)).unwrap();
    assert_eq!(again.data["attachment"]["path"], json!("images/pic.png"));
    assert_eq!(env.stored_files(), 1);
}

#[test]
fn file_failures_follow_their_strategies() {
    let mut env = Env::new();
    env.add_media("pic.png", 8, 8, ImageFormat::Png);

    let field = FileField::new("attachment").max_filesize(10).max_retries(1);
    let cleaned = env
        .clean(&set(field), &json!({"attachment": "/pic.png"}), None)
        .unwrap();
    assert_eq!(
        cleaned.errors.get("attachment").unwrap()[0].code,
        ErrorCode::MaxFilesizeExceeded
    );

    let field = FileField::new("attachment")
        .max_retries(1)
        .on_download_error(Strategy::SkipField)
        .unwrap();
    let cleaned = env
        .clean(&set(field), &json!({"attachment": "/missing.png"}), None)
        .unwrap();
    assert!(cleaned.data.is_empty());
    assert!(cleaned.errors.is_empty());

    let cleaned = env
        .clean(&set(FileField::new("attachment").max_retries(1)), &json!({"attachment": "/missing.png"}), None)
        .unwrap();
    assert_eq!(
        cleaned.errors.get("attachment").unwrap()[0].code,
        ErrorCode::DownloadError
    );
}
