//! HTML sanitizing and the plain HTML field.
//!
//! Legacy markup is tokenized with a small forgiving scanner: tags, text and
//! nothing else. Comments, doctypes and processing instructions are dropped.

use std::collections::HashMap;

use salvage_core::unquote_plus;
use serde_json::Value;

use crate::error::FieldError;
use crate::field::{CLEAN_COST_LOW, CleanContext, Field, FieldBase};

// ── Tokenizer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tag {
    pub name: String,
    pub closing: bool,
    pub self_closing: bool,
    pub attrs: Vec<(String, Option<String>)>,
}

impl Tag {
    pub fn open(name: &str) -> Self {
        Self {
            name: name.to_string(),
            closing: false,
            self_closing: false,
            attrs: Vec::new(),
        }
    }

    pub fn close(name: &str) -> Self {
        Self {
            closing: true,
            ..Self::open(name)
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.name == name && !self.closing
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Replace the attribute's value, or append it.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.attrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(n, _)| n != name);
    }

    fn render(&self) -> String {
        let mut out = String::from("<");
        if self.closing {
            out.push('/');
        }
        out.push_str(&self.name);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            if let Some(value) = value {
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Text(String),
    Tag(Tag),
}

/// Index of the `>` closing the tag starting at `s[0]`, ignoring any inside
/// quoted attribute values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_attrs(mut s: &str) -> Vec<(String, Option<String>)> {
    let mut attrs = Vec::new();
    loop {
        s = s.trim_start();
        if s.is_empty() {
            break;
        }
        let name_end = s
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(s.len());
        if name_end == 0 {
            s = &s[1..];
            continue;
        }
        let name = s[..name_end].to_ascii_lowercase();
        s = s[name_end..].trim_start();

        let Some(after) = s.strip_prefix('=') else {
            attrs.push((name, None));
            continue;
        };
        let after = after.trim_start();
        let value = match after.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &after[1..];
                match body.find(q) {
                    Some(end) => {
                        s = &body[end + 1..];
                        &body[..end]
                    }
                    None => {
                        s = "";
                        body
                    }
                }
            }
            _ => {
                let end = after.find(char::is_whitespace).unwrap_or(after.len());
                s = &after[end..];
                &after[..end]
            }
        };
        attrs.push((name, Some(value.to_string())));
    }
    attrs
}

fn parse_tag(inner: &str) -> Option<Tag> {
    let closing = inner.starts_with('/');
    let body = inner.trim_start_matches('/').trim_end();
    let self_closing = body.ends_with('/');
    let body = body.trim_end_matches('/');
    let name_end = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    if name_end == 0 {
        return None;
    }
    Some(Tag {
        name: body[..name_end].to_ascii_lowercase(),
        closing,
        self_closing,
        attrs: if closing {
            Vec::new()
        } else {
            parse_attrs(&body[name_end..])
        },
    })
}

pub(crate) fn tokenize(html: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = html;

    let flush = |text: &mut String, tokens: &mut Vec<Token>| {
        if !text.is_empty() {
            tokens.push(Token::Text(std::mem::take(text)));
        }
    };

    while let Some(pos) = rest.find('<') {
        text.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if rest.starts_with("<!--") {
            rest = match rest.find("-->") {
                Some(end) => &rest[end + 3..],
                None => "",
            };
            continue;
        }
        let starts_tag = rest[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !starts_tag {
            text.push('<');
            rest = &rest[1..];
            continue;
        }
        let Some(end) = tag_end(rest) else {
            break;
        };
        let inner = &rest[1..end];
        rest = &rest[end + 1..];
        if inner.starts_with('!') || inner.starts_with('?') {
            continue;
        }
        if let Some(tag) = parse_tag(inner) {
            flush(&mut text, &mut tokens);
            tokens.push(Token::Tag(tag));
        }
    }
    text.push_str(rest);
    flush(&mut text, &mut tokens);
    tokens
}

pub(crate) fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match t {
            Token::Text(s) => s.clone(),
            Token::Tag(tag) => tag.render(),
        })
        .collect()
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Text content with every tag removed.
pub fn strip_tags(html: &str) -> String {
    tokenize(html)
        .into_iter()
        .filter_map(|t| match t {
            Token::Text(s) => Some(s),
            Token::Tag(_) => None,
        })
        .collect()
}

/// Decode named and numeric character references.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let decoded = rest.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Whether a paragraph's content is only whitespace and line breaks.
fn is_blank(tokens: &[Token]) -> bool {
    tokens.iter().all(|t| match t {
        Token::Text(s) => s.replace("&nbsp;", "").trim().is_empty(),
        Token::Tag(tag) => tag.name == "br",
    })
}

fn remove_empty_paragraphs(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Tag(tag) = &tokens[i]
            && tag.name == "p"
            && !tag.closing
        {
            let close = tokens[i + 1..].iter().position(|t| {
                matches!(t, Token::Tag(Tag { name, closing: true, .. }) if name == "p")
            });
            if let Some(len) = close
                && is_blank(&tokens[i + 1..i + 1 + len])
            {
                i += len + 2;
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

/// Collapse whitespace runs spanning several lines to a single newline.
fn collapse_blank_lines(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\n' {
            let mut j = i + 1;
            let mut last_newline = i;
            while j < chars.len() && chars[j].is_whitespace() {
                if chars[j] == '\n' {
                    last_newline = j;
                }
                j += 1;
            }
            out.push('\n');
            i = if last_newline > i { last_newline + 1 } else { i + 1 };
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

// ── Sanitizing ──────────────────────────────────────────────────────────────

/// Cleans untrusted markup.
pub trait HtmlSanitizer {
    fn sanitize(&self, html: &str) -> String;
}

/// Keeps allow-listed tags and attributes. Other tags are removed but their
/// text kept; `script` and `style` elements are removed with their content.
/// Renamed tags are checked under their new name.
#[derive(Debug, Clone)]
pub struct AllowListSanitizer {
    tags: Vec<String>,
    attrs: HashMap<String, Vec<String>>,
    renames: HashMap<String, String>,
}

const DEFAULT_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "bdi", "blockquote", "br", "cite", "code", "dd", "dl", "dt", "em",
    "h2", "h3", "h4", "h5", "i", "li", "ol", "p", "small", "span", "strong", "ul",
];

const DEFAULT_ATTRS: &[(&str, &[&str])] = &[
    ("a", &["class", "href", "target", "title"]),
    ("abbr", &["title"]),
    ("acronym", &["title"]),
    ("cite", &["dir", "lang", "title"]),
    ("span", &["dir", "class", "lang", "title"]),
    ("h2", &["dir", "class", "lang", "title"]),
    ("h3", &["dir", "class", "lang", "title"]),
    ("h4", &["dir", "class", "lang", "title"]),
    ("h5", &["dir", "class", "lang", "title"]),
];

const RICH_TEXT_TAGS: &[&str] = &[
    "a", "br", "em", "h2", "h3", "h4", "img", "li", "ol", "p", "strong", "ul",
];

impl Default for AllowListSanitizer {
    fn default() -> Self {
        Self {
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            attrs: DEFAULT_ATTRS
                .iter()
                .map(|(tag, attrs)| (tag.to_string(), attrs.iter().map(|a| a.to_string()).collect()))
                .collect(),
            renames: HashMap::new(),
        }
    }
}

impl AllowListSanitizer {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            attrs: HashMap::new(),
            renames: HashMap::new(),
        }
    }

    /// The markup rich-text editors accept: presentational tags become
    /// their semantic equivalents and minor headings become paragraphs.
    pub fn rich_text() -> Self {
        Self::new(RICH_TEXT_TAGS.iter().copied())
            .allow_attrs("a", ["href", "title", "class", "name", "id"])
            .allow_attrs("img", ["alt", "src", "class", "id"])
            .rename_tag("b", "strong")
            .rename_tag("i", "em")
            .rename_tag("h5", "p")
            .rename_tag("h6", "p")
    }

    pub fn rename_tag(mut self, from: &str, to: &str) -> Self {
        self.renames.insert(from.to_string(), to.to_string());
        self
    }

    pub fn allow_attrs<I, S>(mut self, tag: &str, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs
            .insert(tag.to_string(), attrs.into_iter().map(Into::into).collect());
        self
    }

    fn keep_attr(&self, tag: &str, name: &str, value: Option<&str>) -> bool {
        let allowed = self
            .attrs
            .get(tag)
            .is_some_and(|attrs| attrs.iter().any(|a| a == name));
        let scripted = value.is_some_and(|v| {
            v.trim_start().to_ascii_lowercase().starts_with("javascript:")
        });
        allowed && !scripted
    }
}

impl HtmlSanitizer for AllowListSanitizer {
    fn sanitize(&self, html: &str) -> String {
        let mut out = Vec::new();
        let mut skipping: Option<String> = None;
        for token in tokenize(html) {
            match token {
                Token::Tag(tag) if skipping.as_deref() == Some(tag.name.as_str()) => {
                    if tag.closing {
                        skipping = None;
                    }
                }
                _ if skipping.is_some() => {}
                Token::Tag(tag) if matches!(tag.name.as_str(), "script" | "style") => {
                    if !tag.closing && !tag.self_closing {
                        skipping = Some(tag.name);
                    }
                }
                Token::Tag(mut tag) => {
                    if let Some(to) = self.renames.get(&tag.name) {
                        tag.name = to.clone();
                    }
                    if !self.tags.contains(&tag.name) {
                        continue;
                    }
                    let name = tag.name.clone();
                    tag.attrs
                        .retain(|(attr, value)| self.keep_attr(&name, attr, value.as_deref()));
                    out.push(Token::Tag(tag));
                }
                Token::Text(text) => out.push(Token::Text(text)),
            }
        }
        render(&out)
    }
}

/// Post-sanitize tidying options.
#[derive(Debug, Clone, Copy)]
pub struct Tidy {
    pub remove_empty_paragraphs: bool,
    pub remove_excess_whitespace: bool,
    pub remove_linebreaks: bool,
}

impl Default for Tidy {
    fn default() -> Self {
        Self {
            remove_empty_paragraphs: true,
            remove_excess_whitespace: true,
            remove_linebreaks: false,
        }
    }
}

pub fn tidy_html(html: &str, tidy: Tidy) -> String {
    let mut value = if tidy.remove_empty_paragraphs {
        render(&remove_empty_paragraphs(tokenize(html)))
    } else {
        html.to_string()
    };
    if tidy.remove_excess_whitespace {
        value = collapse_blank_lines(&value);
    }
    if tidy.remove_linebreaks {
        value = value.replace('\n', "");
    }
    value
}

// ── HtmlField ───────────────────────────────────────────────────────────────

/// Markup, sanitized and tidied. Links are kept as they are; see
/// [`RichTextField`](crate::RichTextField) for markup whose links should
/// point at migrated entities.
pub struct HtmlField {
    base: FieldBase,
    sanitizer: Box<dyn HtmlSanitizer>,
    tidy: Tidy,
}

impl HtmlField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_LOW)
                .with_default_fallback(Value::String(String::new())),
            sanitizer: Box::new(AllowListSanitizer::default()),
            tidy: Tidy::default(),
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
}

impl Field for HtmlField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn clean(&self, value: Value, _ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let raw = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let sanitized = self.sanitizer.sanitize(&unquote_plus(&raw));
        Ok(Value::String(tidy_html(&sanitized, self.tidy)))
    }
}
