//! Rich text whose internal links point at migrated entities.
//!
//! Legacy markup links to pages and documents by URL. After sanitizing, each
//! `<a href>` is resolved through the run's document and page finders; a
//! match replaces the `href` with `linktype` and `id` attributes naming the
//! entity. Links that cannot be resolved are left untouched and reported,
//! never failing the row.

use salvage_core::{EntityStore, UrlParts};
use salvage_finder::{FindError, FinderRegistry};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{FieldConfigError, FieldError};
use crate::field::{CLEAN_COST_HIGH, CleanContext, Field, FieldBase};
use crate::html::{AllowListSanitizer, HtmlSanitizer, Tag, Tidy, Token, render, tidy_html, tokenize};
use crate::strategy::FieldDefaults;

/// A link that could not be pointed at an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkMatchError {
    pub url: String,
    pub message: String,
}

/// Rich text after parsing, with the links that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRichText {
    pub html: String,
    pub link_errors: Vec<LinkMatchError>,
}

/// The id shared by a legacy footnote and the links to it: a name-based
/// UUID of the reference's last `_`-separated part.
pub fn footnote_uuid(reference: &str) -> Uuid {
    let number = reference.rsplit('_').next().unwrap_or(reference);
    Uuid::new_v3(&Uuid::NAMESPACE_DNS, number.as_bytes())
}

fn footnote_marker(id: &Uuid) -> String {
    let short: String = id.to_string().chars().take(6).collect();
    format!("[{}]", short)
}

/// Replace `<a href="#footnote_N">…</a>` with `<footnote id="…">[…]</footnote>`.
fn convert_footnote_links(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        let reference = match &token {
            Token::Tag(tag) if tag.is_open("a") && !tag.self_closing => tag
                .attr("href")
                .filter(|href| href.starts_with("#footnote"))
                .map(str::to_string),
            _ => None,
        };
        let Some(reference) = reference else {
            out.push(token);
            continue;
        };
        for inner in tokens.by_ref() {
            if matches!(&inner, Token::Tag(tag) if tag.name == "a" && tag.closing) {
                break;
            }
        }
        let id = footnote_uuid(&reference);
        let mut open = Tag::open("footnote");
        open.set_attr("id", id.to_string());
        out.push(Token::Tag(open));
        out.push(Token::Text(footnote_marker(&id)));
        out.push(Token::Tag(Tag::close("footnote")));
    }
    out
}

// ── Link rewriting ──────────────────────────────────────────────────────────

enum Resolution {
    Unsupported,
    Found(i64),
    Failed(String),
}

/// Points internal links at entities through named finders.
#[derive(Debug, Clone)]
pub struct LinkRewriter {
    documents: Option<String>,
    pages: Option<String>,
}

impl Default for LinkRewriter {
    fn default() -> Self {
        Self {
            documents: Some("documents".to_string()),
            pages: Some("pages".to_string()),
        }
    }
}

impl LinkRewriter {
    /// A rewriter using only the finders named. `None` skips that link type.
    pub fn new(documents: Option<&str>, pages: Option<&str>) -> Self {
        Self {
            documents: documents.map(str::to_string),
            pages: pages.map(str::to_string),
        }
    }

    pub fn check(&self, field: &str, finders: &FinderRegistry) -> Result<(), FieldConfigError> {
        for name in [&self.documents, &self.pages].into_iter().flatten() {
            if !finders.contains(name) {
                return Err(FieldConfigError::UnknownFinder {
                    field: field.to_string(),
                    finder: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn resolve(
        name: Option<&str>,
        url: &str,
        store: &dyn EntityStore,
        finders: &mut FinderRegistry,
    ) -> Result<Resolution, FieldError> {
        let Some(finder) = name.and_then(|n| finders.get_mut(n)) else {
            return Ok(Resolution::Unsupported);
        };
        let Ok(value) = finder.lookup_value(url) else {
            return Ok(Resolution::Unsupported);
        };
        match finder.find_value(store, &value) {
            Ok(entity) => Ok(match entity.id {
                Some(id) => Resolution::Found(id),
                None => Resolution::Failed(format!("{} has no id", entity.describe())),
            }),
            Err(e @ (FindError::NotFound { .. } | FindError::MultipleMatches { .. })) => {
                Ok(Resolution::Failed(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rewrite_link(
        &self,
        tag: &mut Tag,
        store: &dyn EntityStore,
        finders: &mut FinderRegistry,
    ) -> Result<Option<LinkMatchError>, FieldError> {
        let Some(url) = tag.attr("href").map(|href| href.trim().to_string()) else {
            return Ok(None);
        };
        if url.starts_with("/www.") {
            tag.set_attr("href", format!("http:/{}", url));
            return Ok(None);
        }
        let has_fragment = UrlParts::parse(&url)
            .fragment
            .is_some_and(|f| !f.is_empty());
        if url.starts_with('#') || has_fragment {
            log::debug!("Leaving rich-text link with fragment alone: '{}'", url);
            return Ok(None);
        }

        // A URL the document finder supports is never tried as a page.
        let targets = [
            (self.documents.as_deref(), "document"),
            (self.pages.as_deref(), "page"),
        ];
        for (finder, linktype) in targets {
            match Self::resolve(finder, &url, store, finders)? {
                Resolution::Unsupported => continue,
                Resolution::Found(id) => {
                    log::debug!("Rich-text link '{}' now points at {} {}", url, linktype, id);
                    tag.remove_attr("href");
                    tag.set_attr("linktype", linktype);
                    tag.set_attr("id", id.to_string());
                    return Ok(None);
                }
                Resolution::Failed(message) => {
                    return Ok(Some(LinkMatchError { url, message }));
                }
            }
        }
        Ok(None)
    }

    /// Rewrite every link in `tokens`, returning those left unresolved.
    pub(crate) fn rewrite(
        &self,
        tokens: &mut [Token],
        store: &dyn EntityStore,
        finders: &mut FinderRegistry,
    ) -> Result<Vec<LinkMatchError>, FieldError> {
        let mut errors = Vec::new();
        for token in tokens.iter_mut() {
            if let Token::Tag(tag) = token
                && tag.is_open("a")
                && let Some(error) = self.rewrite_link(tag, store, finders)?
            {
                errors.push(error);
            }
        }
        Ok(errors)
    }
}

// ── RichTextField ───────────────────────────────────────────────────────────

/// Legacy markup cleaned for a rich-text editor, with internal links and
/// footnote references rewritten.
pub struct RichTextField {
    base: FieldBase,
    sanitizer: Box<dyn HtmlSanitizer>,
    tidy: Tidy,
    links: LinkRewriter,
    footnotes: bool,
    links_only: bool,
}

impl RichTextField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_HIGH)
                .with_default_fallback(Value::String(String::new())),
            sanitizer: Box::new(AllowListSanitizer::rich_text()),
            tidy: Tidy::default(),
            links: LinkRewriter::default(),
            footnotes: true,
            links_only: false,
        }
    }

    pub fn sanitizer(mut self, sanitizer: impl HtmlSanitizer + 'static) -> Self {
        self.sanitizer = Box::new(sanitizer);
        self
    }

    pub fn tidy(mut self, tidy: Tidy) -> Self {
        self.tidy = tidy;
        self
    }

    pub fn links(mut self, links: LinkRewriter) -> Self {
        self.links = links;
        self
    }

    /// Leave `#footnote` links as plain links.
    pub fn keep_footnote_links(mut self) -> Self {
        self.footnotes = false;
        self
    }

    /// Only rewrite links, for markup that is already clean.
    pub fn links_only(mut self) -> Self {
        self.links_only = true;
        self
    }

    pub fn parse(
        &self,
        html: &str,
        store: &dyn EntityStore,
        finders: &mut FinderRegistry,
    ) -> Result<ParsedRichText, FieldError> {
        if html.trim().is_empty() {
            return Ok(ParsedRichText::default());
        }
        let mut tokens = if self.links_only {
            tokenize(html)
        } else {
            let tokens = tokenize(&self.sanitizer.sanitize(html));
            if self.footnotes {
                convert_footnote_links(tokens)
            } else {
                tokens
            }
        };
        let link_errors = self.links.rewrite(&mut tokens, store, finders)?;
        Ok(ParsedRichText {
            html: tidy_html(&render(&tokens), self.tidy),
            link_errors,
        })
    }

    fn parse_logged(&self, html: &str, ctx: &mut CleanContext<'_>) -> Result<String, FieldError> {
        let parsed = self.parse(html, ctx.store, ctx.finders)?;
        for error in &parsed.link_errors {
            log::warn!(
                "Field '{}': failed to update rich-text link '{}': {}",
                self.base.name,
                error.url,
                error.message
            );
        }
        Ok(parsed.html)
    }
}

impl Field for RichTextField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn bind(
        &mut self,
        finders: &FinderRegistry,
        _defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        self.links.check(&self.base.name, finders)
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let raw = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(Value::String(self.parse_logged(&raw, ctx)?))
    }
}

// ── FootnotesField ──────────────────────────────────────────────────────────

/// Footnotes supplied as an HTML list. Each `<li class="footnote"
/// id="footnote_N">` becomes `{"uuid", "text"}`, the uuid matching the
/// `<footnote>` elements [`RichTextField`] makes of links to it.
pub struct FootnotesField {
    base: FieldBase,
    text: RichTextField,
}

impl FootnotesField {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base: FieldBase::new(name.clone(), true, CLEAN_COST_HIGH)
                .with_default_fallback(Value::Array(Vec::new())),
            text: RichTextField::new(name),
        }
    }

    /// How each footnote's text is parsed.
    pub fn text(mut self, text: RichTextField) -> Self {
        self.text = text;
        self
    }
}

/// `(id attribute, inner markup)` of every `<li class="footnote">`.
fn footnote_items(html: &str) -> Vec<(String, String)> {
    let tokens = tokenize(html);
    let mut items = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let start = match &tokens[i] {
            Token::Tag(tag)
                if tag.is_open("li")
                    && tag
                        .attr("class")
                        .is_some_and(|class| class.split_whitespace().any(|c| c == "footnote")) =>
            {
                tag.attr("id").map(str::to_string)
            }
            _ => None,
        };
        i += 1;
        let Some(id) = start else { continue };

        let mut depth = 1;
        let body_start = i;
        while i < tokens.len() {
            if let Token::Tag(tag) = &tokens[i]
                && tag.name == "li"
                && !tag.self_closing
            {
                depth += if tag.closing { -1 } else { 1 };
                if depth == 0 {
                    break;
                }
            }
            i += 1;
        }
        items.push((id, render(&tokens[body_start..i.min(tokens.len())])));
        i += 1;
    }
    items
}

impl Field for FootnotesField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn bind(
        &mut self,
        finders: &FinderRegistry,
        defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        self.text.bind(finders, defaults)
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let raw = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let mut footnotes = Vec::new();
        for (id, contents) in footnote_items(&raw) {
            let text = self.text.parse_logged(&contents, ctx)?;
            footnotes.push(json!({
                "uuid": footnote_uuid(&id).to_string(),
                "text": text,
            }));
        }
        Ok(Value::Array(footnotes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footnote_ids_use_the_last_reference_part() {
        assert_eq!(footnote_uuid("#footnote_123456"), footnote_uuid("footnote_123456"));
        assert_eq!(
            footnote_uuid("#footnote_123456"),
            Uuid::new_v3(&Uuid::NAMESPACE_DNS, b"123456")
        );
        assert_ne!(footnote_uuid("#footnote_1"), footnote_uuid("#footnote_2"));
    }

    #[test]
    fn footnote_links_become_footnote_elements() {
        let tokens = tokenize(r##"<p>Fact<a href="#footnote_42"><sup>1</sup></a>.</p>"##);
        let id = footnote_uuid("42");
        assert_eq!(
            render(&convert_footnote_links(tokens)),
            format!(
                r#"<p>Fact<footnote id="{}">{}</footnote>.</p>"#,
                id,
                footnote_marker(&id)
            )
        );
    }

    #[test]
    fn footnote_items_respect_nesting() {
        let html = r#"<ul><li class="footnote" id="footnote_1">One <ul><li>inner</li></ul></li><li>plain</li><li class="x footnote" id="footnote_2">Two</li></ul>"#;
        assert_eq!(
            footnote_items(html),
            vec![
                ("footnote_1".to_string(), "One <ul><li>inner</li></ul>".to_string()),
                ("footnote_2".to_string(), "Two".to_string()),
            ]
        );
    }
}
