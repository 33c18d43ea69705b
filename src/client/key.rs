//! Query parameters, canonical cache keys and secret redaction.

use reqwest::Url;

/// Parameter names that never reach a cache key or a log line.
pub const DEFAULT_SENSITIVE_PARAMS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "access_token",
    "password",
    "secret",
    "authorization",
];

/// Ordered list of query parameters.
///
/// Multi-valued parameters are kept as repeated pairs. Values are rendered
/// with `ToString`, so booleans come out as `true`/`false`.
///
/// ```rust
/// # use fredgate::QueryParams;
/// let params = QueryParams::new()
///     .with("series_id", "GDP")
///     .with_opt("limit", Some(10))
///     .with_opt("offset", None::<u32>)
///     .with_all("tag_names", ["usa", "gdp"]);
/// assert_eq!(params.len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.pairs.push((key.into(), value.to_string()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    /// Append a parameter only when a value is present.
    pub fn with_opt<V: ToString>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    /// Append one pair per value.
    pub fn with_all<I>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let key = key.into();
        for value in values {
            self.push(key.clone(), value);
        }
        self
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (k, v) in iter {
            params.push(k, v);
        }
        params
    }
}

fn is_sensitive(name: &str, sensitive: &[&str]) -> bool {
    sensitive.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Canonical cache key for a request.
///
/// Pairs are sorted by name then value and sensitive parameters are
/// dropped, so parameter order and credentials never change the key. The
/// result doubles as a log-safe rendering of the request URL.
pub fn cache_key(url: &str, params: &QueryParams, sensitive: &[&str]) -> String {
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .filter(|(k, _)| !is_sensitive(k, sensitive))
        .collect();
    pairs.sort_unstable();

    if pairs.is_empty() {
        return url.to_owned();
    }
    match Url::parse_with_params(url, &pairs) {
        Ok(url) => url.into(),
        Err(_) => {
            let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{url}?{}", query.join("&"))
        }
    }
}

/// Mask credential values embedded in free-form text.
///
/// Covers `name=value` pairs for every [`DEFAULT_SENSITIVE_PARAMS`] entry
/// (case-insensitive) and `Bearer <token>` headers.
pub fn redact_secrets(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    let mut collect = |needle: &str, needs_boundary: bool| {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(needle) {
            let begin = from + pos;
            let start = begin + needle.len();
            let at_boundary = begin == 0 || !is_name_byte(bytes[begin - 1]);
            let end = value_end(bytes, start);
            if (at_boundary || !needs_boundary) && end > start {
                spans.push((start, end));
            }
            from = start;
        }
    };
    for name in DEFAULT_SENSITIVE_PARAMS {
        collect(&format!("{name}="), true);
    }
    collect("bearer ", true);

    if spans.is_empty() {
        return text.to_owned();
    }
    spans.sort_unstable();

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if end <= cursor {
            continue;
        }
        let start = start.max(cursor);
        out.push_str(&text[cursor..start]);
        out.push_str("***");
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// End of a credential value: the next delimiter or end of text.
fn value_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| {
            b.is_ascii_whitespace() || matches!(b, b'&' | b'"' | b'\'' | b',' | b';' | b')' | b'>')
        })
        .map_or(bytes.len(), |offset| start + offset)
}
