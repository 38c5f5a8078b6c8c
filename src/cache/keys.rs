//! Cache key definitions.
//!
//! A key pairs the content-encoding variant of a response with its request
//! path (`br::/posts/hello`). Before a key touches the store every `/` is
//! swapped for [`PATH_PLACEHOLDER`] so it can double as a directory name.

use std::fmt;

/// Separator between the encoding tag and the path.
pub const KEY_SEPARATOR: &str = "::";

/// Filesystem-safe stand-in for `/` inside storage keys.
pub const PATH_PLACEHOLDER: char = '+';

/// Content-encoding variant under which a resource is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Br,
    Gzip,
    None,
}

impl Encoding {
    /// Every variant, in the order purge visits them.
    pub const ALL: [Encoding; 3] = [Encoding::Br, Encoding::Gzip, Encoding::None];

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Br => "br",
            Encoding::Gzip => "gzip",
            Encoding::None => "none",
        }
    }

    /// Pick the variant to look up for a request's `Accept-Encoding` values.
    ///
    /// Brotli wins whenever it is offered; gzip is used otherwise.
    pub fn negotiate<'a>(accept_encoding: impl IntoIterator<Item = &'a str>) -> Self {
        let mut chosen = Encoding::None;
        for value in accept_encoding {
            if value.contains("br") {
                return Encoding::Br;
            }
            if value.contains("gzip") {
                chosen = Encoding::Gzip;
            }
        }
        chosen
    }

    /// Map a response `Content-Encoding` header to a variant.
    ///
    /// A missing or empty header is `none`. Any other coding has no variant
    /// and yields `None`, so the body is never filed under a key it would be
    /// served from with the wrong `Content-Encoding`.
    pub fn from_content_encoding(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None => Some(Encoding::None),
            Some(v) if v.is_empty() => Some(Encoding::None),
            Some(v) if v.eq_ignore_ascii_case("br") => Some(Encoding::Br),
            Some(v) if v.eq_ignore_ascii_case("gzip") => Some(Encoding::Gzip),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup key for one encoding variant of a logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub encoding: Encoding,
    pub path: String,
}

impl CacheKey {
    pub fn new(encoding: Encoding, path: impl Into<String>) -> Self {
        Self {
            encoding,
            path: path.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.encoding, self.path)
    }
}

/// Replace path separators so the key is usable as a single directory name.
pub fn normalize(key: &str) -> String {
    key.replace('/', &PATH_PLACEHOLDER.to_string())
}

/// Storage keys of all encoding variants for a logical path.
pub fn variants(path: &str) -> [String; 3] {
    let path = normalize(path);
    Encoding::ALL.map(|encoding| format!("{encoding}{KEY_SEPARATOR}{path}"))
}
