//! URL and path helpers for legacy references.

use url::{ParseError, Url};

const RELATIVE_BASE: &str = "http://relative.invalid/";

/// The parsed parts of a raw legacy URL or path.
///
/// Parsing never fails: anything that is not an absolute URL is treated as
/// a path relative to an unknown host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: Option<String>,
    pub host: Option<String>,
    /// Explicit port only; default ports are not filled in.
    pub port: Option<u16>,
    /// Percent-decoded path.
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl UrlParts {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix("//") {
            let mut parts = Self::from_url(Url::parse(&format!("http://{}", rest)).ok(), raw);
            parts.scheme = None;
            return parts;
        }

        match Url::parse(raw) {
            Ok(url) if url.cannot_be_a_base() => Self {
                scheme: Some(url.scheme().to_string()),
                path: decode(url.path()),
                query: url.query().map(str::to_string),
                fragment: url.fragment().map(str::to_string),
                ..Default::default()
            },
            Ok(url) => Self::from_url(Some(url), raw),
            Err(ParseError::RelativeUrlWithoutBase) => {
                let joined = Url::parse(RELATIVE_BASE).and_then(|base| base.join(raw)).ok();
                let mut parts = Self::from_url(joined, raw);
                parts.scheme = None;
                parts.host = None;
                parts.port = None;
                parts
            }
            Err(_) => Self {
                path: raw.to_string(),
                ..Default::default()
            },
        }
    }

    fn from_url(url: Option<Url>, raw: &str) -> Self {
        match url {
            Some(url) => Self {
                scheme: Some(url.scheme().to_string()),
                host: url.host_str().map(|h| h.to_lowercase()),
                port: url.port(),
                path: decode(url.path()),
                query: url.query().map(str::to_string),
                fragment: url.fragment().map(str::to_string),
            },
            None => Self {
                path: raw.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn is_relative(&self) -> bool {
        self.scheme.is_none() && self.host.is_none()
    }

    pub fn has_web_scheme(&self) -> bool {
        matches!(self.scheme.as_deref(), None | Some("http") | Some("https"))
    }

    /// The final path segment.
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

fn decode(path: &str) -> String {
    urlencoding::decode(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// `/`-prefixed path without surrounding slashes or whitespace; the empty
/// path normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches(|c: char| c == '/' || c.is_whitespace());
    format!("/{}", trimmed)
}

/// The filename component of a URL or path.
pub fn filename_from_url(raw: &str) -> String {
    UrlParts::parse(raw).filename().to_string()
}

/// Decode `+` as space, then percent escapes.
pub fn unquote_plus(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|d| d.into_owned())
        .unwrap_or(spaced)
}

/// Hostnames the legacy site was served from.
///
/// Both the bare and the `www.` form of every configured host are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyHosts {
    pub link: Vec<String>,
    pub media: Vec<String>,
}

impl LegacyHosts {
    pub fn new<I, J, S, T>(link: I, media: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            link: with_www_variants(link),
            media: with_www_variants(media),
        }
    }

    /// Relative references and absolute ones pointing at a link host.
    pub fn is_internal(&self, url: &UrlParts) -> bool {
        if !url.has_web_scheme() {
            return false;
        }
        match &url.host {
            None => true,
            Some(host) => self.link.iter().any(|h| h == host),
        }
    }

    pub fn is_external(&self, url: &UrlParts) -> bool {
        !self.is_internal(url)
    }

    /// References that may point at a legacy media file: relative ones and
    /// those on a media or link host.
    pub fn is_media(&self, url: &UrlParts) -> bool {
        if !url.has_web_scheme() {
            return false;
        }
        match &url.host {
            None => true,
            Some(host) => self.media.iter().chain(self.link.iter()).any(|h| h == host),
        }
    }
}

fn with_www_variants<I, S>(hosts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for host in hosts {
        let host = host.as_ref().trim().to_lowercase();
        if host.is_empty() {
            continue;
        }
        let bare = host.strip_prefix("www.").unwrap_or(&host).to_string();
        let www = format!("www.{}", bare);
        for h in [bare, www] {
            if !out.contains(&h) {
                out.push(h);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_urls() {
        let p = UrlParts::parse("https://www.Example.com:8080/a%20b/c.jpg?x=1#top");
        assert_eq!(p.scheme.as_deref(), Some("https"));
        assert_eq!(p.host.as_deref(), Some("www.example.com"));
        assert_eq!(p.port, Some(8080));
        assert_eq!(p.path, "/a b/c.jpg");
        assert_eq!(p.query.as_deref(), Some("x=1"));
        assert_eq!(p.fragment.as_deref(), Some("top"));
    }

    #[test]
    fn parses_relative_paths() {
        let p = UrlParts::parse("/legacy/photo.jpg");
        assert!(p.is_relative());
        assert_eq!(p.path, "/legacy/photo.jpg");
        assert_eq!(p.filename(), "photo.jpg");

        let p = UrlParts::parse("//cdn.example.com/x.png");
        assert_eq!(p.scheme, None);
        assert_eq!(p.host.as_deref(), Some("cdn.example.com"));
    }

    #[test]
    fn default_port_is_not_reported() {
        assert_eq!(UrlParts::parse("http://example.com:80/").port, None);
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("/about/team/"), "/about/team");
        assert_eq!(normalize_path(" about "), "/about");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn unquotes_plus_and_percent() {
        assert_eq!(unquote_plus("my+file%2Bname.pdf"), "my file+name.pdf");
    }

    #[test]
    fn host_classification() {
        let hosts = LegacyHosts::new(["example.com"], ["media.example.com"]);
        assert!(hosts.is_internal(&UrlParts::parse("/about")));
        assert!(hosts.is_internal(&UrlParts::parse("http://www.example.com/about")));
        assert!(hosts.is_external(&UrlParts::parse("http://other.org/about")));
        assert!(hosts.is_external(&UrlParts::parse("mailto:someone@example.com")));
        assert!(hosts.is_media(&UrlParts::parse("http://media.example.com/x.jpg")));
        assert!(!hosts.is_media(&UrlParts::parse("http://other.org/x.jpg")));
    }
}
