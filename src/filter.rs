//! Inclusion filter for declared artifact paths
//!
//! A path participates in a merge when it matches at least one inclusion
//! pattern. Patterns are case-insensitive regular expressions anchored at the
//! start of the path only (a pattern `outputs/` matches
//! `outputs/slope.tif`).
//!
//! The filter always carries the patterns for the files the merge needs to
//! rebuild itself: the metadata tree, the extent file, and log files.

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

/// Patterns added to every filter regardless of caller input.
pub const IMPLICIT_PATTERNS: [&str; 3] = [r"project\.rs\.xml", r".*project_bounds\.geojson", r".*\.log"];

/// Compiled set of inclusion patterns.
#[derive(Debug, Clone)]
pub struct InclusionFilter {
    sources: Vec<String>,
    patterns: Vec<Regex>,
}

impl InclusionFilter {
    /// Compile a filter from caller-supplied patterns.
    ///
    /// Each entry may itself hold several patterns separated by `|` at the top
    /// level, the way the download tooling accepts them (`.*brat\.gpkg|.*\.tif`).
    /// An empty list includes every path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Regex` when a pattern does not compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut sources: Vec<String> = patterns
            .iter()
            .flat_map(|p| split_patterns(p.as_ref()))
            .collect();

        if sources.is_empty() {
            sources.push(".*".to_string());
        }
        for implicit in IMPLICIT_PATTERNS {
            if !sources.iter().any(|s| s == implicit) {
                sources.push(implicit.to_string());
            }
        }

        let patterns = sources
            .iter()
            .map(|source| {
                RegexBuilder::new(&format!("^(?:{})", source))
                    .case_insensitive(true)
                    .build()
                    .map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { sources, patterns })
    }

    /// A filter that includes every path.
    pub fn include_all() -> Self {
        let empty: [&str; 0] = [];
        // ".*" and the implicit patterns are known to compile.
        Self::new(&empty).unwrap_or_else(|_| Self {
            sources: Vec::new(),
            patterns: Vec::new(),
        })
    }

    /// Whether `path` matches at least one pattern.
    ///
    /// Backslashes are normalised to forward slashes first so metadata trees
    /// written on Windows match the same patterns.
    pub fn matches(&self, path: &str) -> bool {
        let normalized = path.replace('\\', "/");
        self.patterns.iter().any(|re| re.is_match(&normalized))
    }

    /// The pattern sources, implicit patterns included.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

/// Split a pipe-separated pattern list, leaving pipes inside groups or
/// character classes alone.
fn split_patterns(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_class = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                current.push(ch);
            }
            '[' if !in_class => {
                in_class = true;
                current.push(ch);
            }
            ']' if in_class => {
                in_class = false;
                current.push(ch);
            }
            '(' if !in_class => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_class => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '|' if depth == 0 && !in_class => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_includes_everything() {
        let filter = InclusionFilter::include_all();
        assert!(filter.matches("outputs/report.html"));
        assert!(filter.matches("inputs/dem.tif"));
    }

    #[test]
    fn test_patterns_are_anchored_at_start_only() {
        let filter = InclusionFilter::new(&["outputs/"]).unwrap();
        assert!(filter.matches("outputs/slope.tif"));
        assert!(!filter.matches("inputs/outputs/slope.tif"));
    }

    #[test]
    fn test_patterns_are_case_insensitive() {
        let filter = InclusionFilter::new(&[r".*brat\.gpkg"]).unwrap();
        assert!(filter.matches("outputs/BRAT.GPKG"));
        assert!(!filter.matches("outputs/brat.html"));
    }

    #[test]
    fn test_implicit_patterns_always_present() {
        let filter = InclusionFilter::new(&[r".*\.tif"]).unwrap();
        assert!(filter.matches("project.rs.xml"));
        assert!(filter.matches("project_bounds.geojson"));
        assert!(filter.matches("inputs/project_bounds.geojson"));
        assert!(filter.matches("logs/brat.log"));
        assert!(!filter.matches("outputs/report.html"));
    }

    #[test]
    fn test_pipe_separated_patterns() {
        let filter = InclusionFilter::new(&[r".*brat\.gpkg|.*\.tif"]).unwrap();
        assert!(filter.matches("outputs/brat.gpkg"));
        assert!(filter.matches("inputs/dem.tif"));
        assert!(!filter.matches("outputs/brat.html"));
    }

    #[test]
    fn test_pipe_inside_group_is_not_split() {
        let parts = split_patterns(r"outputs/(dem|slope)\.tif|.*\.gpkg");
        assert_eq!(parts, vec![r"outputs/(dem|slope)\.tif", r".*\.gpkg"]);
    }

    #[test]
    fn test_windows_separators_are_normalised() {
        let filter = InclusionFilter::new(&["outputs/"]).unwrap();
        assert!(filter.matches(r"outputs\slope.tif"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let result = InclusionFilter::new(&["[unclosed"]);
        assert!(matches!(result, Err(Error::Regex(_))));
    }
}
