//! Text location for scoped edits.
//!
//! Two passes, never mixed:
//! 1. Exact substring match
//! 2. Loose match tolerating `\r\n` vs `\n` and trailing whitespace per line
//!
//! The loose pass only runs when the exact pass finds nothing, and its
//! matches are counted on their own.

use regex_lite::Regex;

/// Which pass produced the matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Loose,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Loose => "loose",
        }
    }
}

/// Byte ranges of every non-overlapping match, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matches {
    pub kind: MatchKind,
    pub ranges: Vec<(usize, usize)>,
}

impl Matches {
    pub fn count(&self) -> usize {
        self.ranges.len()
    }
}

/// Locate `needle` in `content`. Returns `None` when neither pass matches.
pub fn find_matches(content: &str, needle: &str) -> Option<Matches> {
    if needle.is_empty() {
        return None;
    }

    let exact: Vec<_> = content
        .match_indices(needle)
        .map(|(start, m)| (start, start + m.len()))
        .collect();
    if !exact.is_empty() {
        return Some(Matches {
            kind: MatchKind::Exact,
            ranges: exact,
        });
    }

    let re = loose_pattern(needle)?;
    let loose: Vec<_> = re
        .find_iter(content)
        .filter(|m| !m.as_str().is_empty())
        .map(|m| (m.start(), m.end()))
        .collect();
    if loose.is_empty() {
        None
    } else {
        Some(Matches {
            kind: MatchKind::Loose,
            ranges: loose,
        })
    }
}

/// Replace the given ranges (sorted, non-overlapping) with `replacement`.
pub fn apply(content: &str, ranges: &[(usize, usize)], replacement: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for &(start, end) in ranges {
        out.push_str(&content[cursor..start]);
        out.push_str(replacement);
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    out
}

fn loose_pattern(needle: &str) -> Option<Regex> {
    let lines: Vec<String> = needle
        .split('\n')
        .map(|line| regex_lite::escape(line.trim_end_matches('\r').trim_end()))
        .collect();
    let pattern = lines.join(r"[ \t]*\r?\n");
    // A needle made only of whitespace would match everywhere.
    if lines.iter().all(|l| l.is_empty()) {
        return None;
    }
    Regex::new(&format!(r"{pattern}[ \t]*")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_preferred() {
        let content = "alpha\nbeta  \nalpha\n";
        let m = find_matches(content, "alpha").unwrap();
        assert_eq!(m.kind, MatchKind::Exact);
        assert_eq!(m.count(), 2);
    }

    #[test]
    fn loose_match_tolerates_line_endings() {
        let content = "- [ ] one\r\n- [ ] two\r\n";
        assert!(!content.contains("- [ ] one\n- [ ] two"));
        let m = find_matches(content, "- [ ] one\n- [ ] two").unwrap();
        assert_eq!(m.kind, MatchKind::Loose);
        assert_eq!(m.count(), 1);
        let (start, _) = m.ranges[0];
        assert_eq!(start, 0);
    }

    #[test]
    fn loose_match_tolerates_trailing_whitespace() {
        let content = "title   \nbody\n";
        let m = find_matches(content, "title\nbody").unwrap();
        assert_eq!(m.kind, MatchKind::Loose);
        let edited = apply(content, &m.ranges, "TITLE\nBODY");
        assert_eq!(edited, "TITLE\nBODY\n");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let content = "cost: $5 (approx.)  \n";
        let m = find_matches(content, "cost: $5 (approx.)\n").unwrap();
        assert_eq!(m.kind, MatchKind::Loose);
        assert!(find_matches("cost: 55 xapproxy", "$5 (approx.)").is_none());
    }

    #[test]
    fn no_match_and_empty_needle() {
        assert!(find_matches("abc", "xyz").is_none());
        assert!(find_matches("abc", "").is_none());
        assert!(find_matches("abc", "  \n").is_none());
    }

    #[test]
    fn apply_multiple_ranges() {
        let content = "a-b-a";
        let m = find_matches(content, "a").unwrap();
        assert_eq!(apply(content, &m.ranges, "x"), "x-b-x");
    }
}
