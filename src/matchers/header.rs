//! Header matching and the request-metadata index (section 4.A).

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// The synthetic header injected before every match, mirroring what a real
/// gRPC request always carries.
const SYNTHETIC_CONTENT_TYPE: (&str, &str) = ("content-type", "application/grpc");

/// ASCII-header-name -> comma-joined value index built from request
/// metadata. Binary-suffixed header names (`-bin`) are dropped: binary
/// values cannot be matched as the decimal/regex/prefix-suffix strings
/// these matchers expect.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    values: HashMap<String, String>,
}

impl HeaderIndex {
    /// Build an index from raw, possibly multi-valued, metadata, then
    /// inject the synthetic `content-type` header.
    pub fn build<I, V>(raw: I) -> Self
    where
        I: IntoIterator<Item = (String, V)>,
        V: IntoIterator<Item = String>,
    {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (name, vals) in raw {
            if name.ends_with("-bin") {
                continue;
            }
            values.entry(name).or_default().extend(vals);
        }
        let mut joined: HashMap<String, String> =
            values.into_iter().map(|(k, v)| (k, v.join(","))).collect();
        joined.entry(SYNTHETIC_CONTENT_TYPE.0.to_string()).or_insert_with(|| SYNTHETIC_CONTENT_TYPE.1.to_string());
        Self { values: joined }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum HeaderMatcherKind {
    /// `present` is the configured "must the header be present" flag;
    /// combined with `inverted` this also expresses "must be absent".
    Present { present: bool },
    ExactValue(String),
    SafeRegex(Arc<Regex>),
    Range { start: i64, end: i64 },
    Prefix(String),
    Suffix(String),
}

#[derive(Debug, Clone)]
pub struct HeaderMatch {
    pub name: String,
    pub matcher: HeaderMatcherKind,
    pub inverted: bool,
}

impl HeaderMatch {
    pub fn matches(&self, index: &HeaderIndex) -> bool {
        let value = index.get(&self.name);
        let base = match &self.matcher {
            HeaderMatcherKind::Present { present } => value.is_some() == *present,
            HeaderMatcherKind::ExactValue(expected) => value == Some(expected.as_str()),
            HeaderMatcherKind::SafeRegex(re) => match value {
                Some(v) => re.find(v).map(|m| m.start() == 0 && m.end() == v.len()).unwrap_or(false),
                None => false,
            },
            HeaderMatcherKind::Range { start, end } => match value.and_then(|v| v.parse::<i64>().ok()) {
                Some(parsed) => parsed >= *start && parsed <= *end,
                None => false,
            },
            HeaderMatcherKind::Prefix(prefix) => value.map(|v| v.starts_with(prefix.as_str())).unwrap_or(false),
            HeaderMatcherKind::Suffix(suffix) => value.map(|v| v.ends_with(suffix.as_str())).unwrap_or(false),
        };
        base ^ self.inverted
    }
}
