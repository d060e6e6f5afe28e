//! Path (method) matching (section 4.A).

use regex::Regex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact { value: String, case_sensitive: bool },
    Prefix { value: String, case_sensitive: bool },
    Regex(Arc<Regex>),
}

impl PathMatcher {
    pub fn matches(&self, method: &str) -> bool {
        match self {
            PathMatcher::Exact { value, case_sensitive } => {
                if *case_sensitive {
                    method == value
                } else {
                    method.eq_ignore_ascii_case(value)
                }
            }
            PathMatcher::Prefix { value, case_sensitive } => {
                if *case_sensitive {
                    method.starts_with(value.as_str())
                } else {
                    method.to_ascii_lowercase().starts_with(&value.to_ascii_lowercase())
                }
            }
            PathMatcher::Regex(re) => {
                // Regex path matching always matches the full method name.
                match re.find(method) {
                    Some(m) => m.start() == 0 && m.end() == method.len(),
                    None => false,
                }
            }
        }
    }
}
