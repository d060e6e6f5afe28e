//! Hostname and virtual-host-domain matching (section 4.A).

use crate::errors::{ResolverError, Result};

/// A validated, lowercased domain pattern: at most one `*`, and only at
/// the leftmost or rightmost position, or the bare `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern<'a> {
    Any,
    Suffix(&'a str),
    Prefix(&'a str),
    Exact(&'a str),
}

fn validate(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(ResolverError::hostname("hostname/pattern must not be empty"));
    }
    if s.starts_with('.') || s.ends_with('.') {
        return Err(ResolverError::hostname(format!(
            "hostname/pattern must not have a leading or trailing '.': {s}"
        )));
    }
    Ok(())
}

fn classify(pattern: &str) -> Result<Pattern<'_>> {
    validate(pattern)?;
    if pattern == "*" {
        return Ok(Pattern::Any);
    }
    let star_count = pattern.matches('*').count();
    if star_count == 0 {
        return Ok(Pattern::Exact(pattern));
    }
    if star_count > 1 {
        return Err(ResolverError::hostname(format!(
            "pattern may contain at most one '*': {pattern}"
        )));
    }
    if let Some(rest) = pattern.strip_prefix('*') {
        return Ok(Pattern::Suffix(rest));
    }
    if let Some(rest) = pattern.strip_suffix('*') {
        return Ok(Pattern::Prefix(rest));
    }
    Err(ResolverError::hostname(format!(
        "'*' must be the leftmost or rightmost character: {pattern}"
    )))
}

/// Case-insensitive match of a hostname against a single domain pattern.
pub fn match_hostname(host: &str, pattern: &str) -> Result<bool> {
    validate(host)?;
    let host = host.to_ascii_lowercase();
    match classify(pattern)? {
        Pattern::Any => Ok(!host.is_empty()),
        Pattern::Suffix(suffix) => {
            let suffix = suffix.to_ascii_lowercase();
            Ok(host.len() > suffix.len() && host.ends_with(&suffix))
        }
        Pattern::Prefix(prefix) => {
            let prefix = prefix.to_ascii_lowercase();
            Ok(host.len() > prefix.len() && host.starts_with(&prefix))
        }
        Pattern::Exact(exact) => Ok(host == exact.to_ascii_lowercase()),
    }
}

/// Length used for wildcard-ranking purposes: the pattern minus the `*`,
/// except the bare `*` which ranks as length 1 (section 4.A).
fn match_length(pattern: &str) -> usize {
    if pattern == "*" {
        1
    } else {
        pattern.len() - 1
    }
}

/// Select the best-matching virtual host for `host` out of `domains_of`
/// (a closure returning each candidate's domain list, in index order).
/// Returns the index of the winning candidate, or `None`.
///
/// Precedence: first exact match wins outright; otherwise the wildcard
/// match with the longest stripped pattern wins; ties prefer suffix
/// wildcards (`*X`) over prefix wildcards (`X*`).
pub fn select_virtual_host<'a, I>(host: &str, candidates: I) -> Result<Option<usize>>
where
    I: IntoIterator<Item = &'a [String]>,
{
    #[derive(Clone, Copy)]
    enum Kind {
        Suffix,
        Prefix,
        Any,
    }

    let mut best: Option<(usize, usize, Kind)> = None; // (candidate_idx, length, kind)

    for (idx, domains) in candidates.into_iter().enumerate() {
        for domain in domains {
            match classify(domain)? {
                Pattern::Exact(exact) => {
                    if host.to_ascii_lowercase() == exact.to_ascii_lowercase() {
                        return Ok(Some(idx));
                    }
                }
                Pattern::Suffix(_) => {
                    if match_hostname(host, domain)? {
                        let len = match_length(domain);
                        best = better(best, (idx, len, Kind::Suffix));
                    }
                }
                Pattern::Prefix(_) => {
                    if match_hostname(host, domain)? {
                        let len = match_length(domain);
                        best = better(best, (idx, len, Kind::Prefix));
                    }
                }
                Pattern::Any => {
                    if match_hostname(host, domain)? {
                        best = better(best, (idx, 1, Kind::Any));
                    }
                }
            }
        }
    }

    fn better(
        current: Option<(usize, usize, Kind)>,
        candidate: (usize, usize, Kind),
    ) -> Option<(usize, usize, Kind)> {
        match current {
            None => Some(candidate),
            Some((_, len, kind)) => {
                if candidate.1 > len {
                    Some(candidate)
                } else if candidate.1 == len {
                    // suffix wildcards beat prefix wildcards on a length tie.
                    match (kind, candidate.2) {
                        (Kind::Prefix, Kind::Suffix) => Some(candidate),
                        _ => current,
                    }
                } else {
                    current
                }
            }
        }
    }

    Ok(best.map(|(idx, _, _)| idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(match_hostname("foo.googleapis.com", "foo.googleapis.com").unwrap());
    }

    #[test]
    fn suffix_wildcard_matches_longer_suffix() {
        assert!(match_hostname("bar.foo.googleapis.com", "*.foo.googleapis.com").unwrap());
    }

    #[test]
    fn prefix_wildcard_matches() {
        assert!(match_hostname("foo.googleapis.com", "foo.*").unwrap());
    }

    #[test]
    fn suffix_wildcard_rejects_equal_length() {
        assert!(!match_hostname("foo.googleapis.com", "*.foo.googleapis.com").unwrap());
    }

    #[test]
    fn bare_star_matches_any_nonempty() {
        assert!(match_hostname("anything", "*").unwrap());
        assert!(match_hostname("x", "*").unwrap());
    }

    #[test]
    fn rejects_leading_trailing_dot() {
        assert!(match_hostname(".foo.com", "foo.com").is_err());
        assert!(match_hostname("foo.com", "foo.com.").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(match_hostname("", "foo.com").is_err());
        assert!(match_hostname("foo.com", "").is_err());
    }

    #[test]
    fn rejects_multiple_stars() {
        assert!(match_hostname("foo.com", "*.foo.*").is_err());
    }

    #[test]
    fn rejects_star_in_middle() {
        assert!(match_hostname("foo.com", "fo*o.com").is_err());
    }

    #[test]
    fn select_prefers_exact_match() {
        let domains = vec![
            vec!["*.example.com".to_string()],
            vec!["foo.example.com".to_string()],
        ];
        let idx = select_virtual_host("foo.example.com", domains.iter().map(|d| d.as_slice()))
            .unwrap();
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn select_prefers_longest_wildcard() {
        let domains = vec![vec!["*.com".to_string()], vec!["*.example.com".to_string()]];
        let idx = select_virtual_host("foo.example.com", domains.iter().map(|d| d.as_slice()))
            .unwrap();
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn select_prefers_suffix_over_prefix_on_tie() {
        // "*.com" (length 4 after stripping '*') vs "com.*" (length 4), both
        // matching "com.foo.com" with equal matched length.
        let domains = vec![vec!["com.*".to_string()], vec!["*.com".to_string()]];
        let idx = select_virtual_host("com.foo.com", domains.iter().map(|d| d.as_slice()))
            .unwrap();
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn select_returns_none_when_nothing_matches() {
        let domains = vec![vec!["foo.example.com".to_string()]];
        let idx =
            select_virtual_host("bar.example.com", domains.iter().map(|d| d.as_slice())).unwrap();
        assert_eq!(idx, None);
    }

    proptest::proptest! {
        #[test]
        fn match_hostname_is_case_insensitive(label in "[a-z]{1,10}") {
            let host = format!("{label}.example.com");
            let upper = host.to_uppercase();
            proptest::prop_assert_eq!(
                match_hostname(&host, &host).unwrap(),
                match_hostname(&upper, &host).unwrap()
            );
        }

        #[test]
        fn exact_domain_always_wins_over_any_competing_wildcard(label in "[a-z]{1,10}") {
            let host = format!("{label}.example.com");
            let domains = vec![vec!["*.example.com".to_string()], vec![host.clone()]];
            let idx =
                select_virtual_host(&host, domains.iter().map(|d| d.as_slice())).unwrap();
            proptest::prop_assert_eq!(idx, Some(1));
        }
    }
}
