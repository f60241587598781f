//! # Placeholder Scanner
//!
//! Locates the next `${...}` expression inside raw text in a single left-to-right
//! pass. The grammar is
//!
//! ```text
//! ${ [type::] component [ '[' env ']' ] @ key [ : default ] }
//! ```
//!
//! Scanning never fails: malformed candidates are skipped and the search restarts
//! at the offending character, so `find_next` either returns a [`Span`] or `None`.
//! Inside a default value, braces opened by `${` or `#{` nest and must balance
//! before the placeholder closes.

use std::ops::Range;

const OPEN_MARKER: &str = "${";
const QUALIFIER_SEPARATOR: &str = "::";

/// A scanned placeholder, with byte offsets of every part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span<'a> {
    text: &'a str,
    range: Range<usize>,
    config_type: Option<Range<usize>>,
    component: Range<usize>,
    environment: Option<Range<usize>>,
    key: Range<usize>,
    default_value: Option<Range<usize>>,
}

impl<'a> Span<'a> {
    /// Byte offset of the opening `$`.
    pub fn start(&self) -> usize {
        self.range.start
    }

    /// Byte offset just past the closing `}`.
    pub fn end(&self) -> usize {
        self.range.end
    }

    /// The raw placeholder text.
    pub fn as_str(&self) -> &'a str {
        self.slice(&self.range)
    }

    /// The `type::` qualifier, if any.
    pub fn config_type(&self) -> Option<&'a str> {
        self.config_type.as_ref().map(|r| self.slice(r))
    }

    /// The component reference (a name, a type or `this`).
    pub fn component(&self) -> &'a str {
        self.slice(&self.component)
    }

    /// The bracketed environment, if any.
    pub fn environment(&self) -> Option<&'a str> {
        self.environment.as_ref().map(|r| self.slice(r))
    }

    /// The referenced key.
    pub fn key(&self) -> &'a str {
        self.slice(&self.key)
    }

    /// Raw text after the first `:`, if any.
    pub fn default_value(&self) -> Option<&'a str> {
        self.default_value.as_ref().map(|r| self.slice(r))
    }

    fn slice(&self, range: &Range<usize>) -> &'a str {
        self.text.get(range.clone()).unwrap_or_default()
    }
}

/// Offsets accumulated while walking one candidate.
#[derive(Debug, Default)]
struct Borders {
    start: usize,
    segment_start: usize,
    config_type: Option<Range<usize>>,
    component: Option<Range<usize>>,
    environment: Option<Range<usize>>,
    key: Option<Range<usize>>,
    default_value: Option<Range<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekOpen { from: usize },
    ScanIdentifier { pos: usize },
    ScanEnvironment { pos: usize },
    ScanKey { pos: usize },
    ScanDefault { pos: usize, depth: usize },
    Closed { end: usize },
    Exhausted,
}

/// Finds the next placeholder at or after byte offset `search_from`.
///
/// Returns `None` when no well-formed placeholder remains. An offset that is past
/// the end of `text` or not on a char boundary also yields `None`.
pub fn find_next(text: &str, search_from: usize) -> Option<Span<'_>> {
    let mut scanner = Scanner {
        text,
        borders: Borders::default(),
    };
    let mut state = State::SeekOpen { from: search_from };
    loop {
        state = match state {
            State::SeekOpen { from } => scanner.seek_open(from),
            State::ScanIdentifier { pos } => scanner.scan_identifier(pos),
            State::ScanEnvironment { pos } => scanner.scan_environment(pos),
            State::ScanKey { pos } => scanner.scan_key(pos),
            State::ScanDefault { pos, depth } => scanner.scan_default(pos, depth),
            State::Closed { end } => return scanner.finish(end),
            State::Exhausted => return None,
        };
    }
}

/// Characters allowed in type qualifiers, component names, environments and keys.
pub fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn is_key_char(c: char) -> bool {
    is_identifier_char(c) || matches!(c, '/' | '\\')
}

/// Characters of `text` from byte offset `pos`, with absolute offsets.
fn chars_from(text: &str, pos: usize) -> impl Iterator<Item = (usize, char)> + '_ {
    text.get(pos..)
        .unwrap_or_default()
        .char_indices()
        .map(move |(i, c)| (pos + i, c))
}

struct Scanner<'a> {
    text: &'a str,
    borders: Borders,
}

impl<'a> Scanner<'a> {
    fn followed_by(&self, pos: usize, c: char) -> bool {
        self.text
            .get(pos..)
            .is_some_and(|rest| rest.starts_with(c))
    }

    /// Abandons the current candidate and searches again from `pos`.
    fn restart(&self, pos: usize) -> State {
        log::trace!(
            "Discarding placeholder candidate at {}; restarting at {}",
            self.borders.start,
            pos
        );
        State::SeekOpen { from: pos }
    }

    fn seek_open(&mut self, from: usize) -> State {
        let Some(found) = self.text.get(from..).and_then(|rest| rest.find(OPEN_MARKER)) else {
            return State::Exhausted;
        };
        let start = from + found;
        let body = start + OPEN_MARKER.len();
        self.borders = Borders {
            start,
            segment_start: body,
            ..Borders::default()
        };
        State::ScanIdentifier { pos: body }
    }

    fn scan_identifier(&mut self, pos: usize) -> State {
        for (i, c) in chars_from(self.text, pos) {
            if is_identifier_char(c) {
                continue;
            }
            let segment = self.borders.segment_start..i;
            match c {
                ':' if self.followed_by(i + 1, ':') => {
                    if self.borders.config_type.is_some() || segment.is_empty() {
                        return self.restart(i);
                    }
                    self.borders.config_type = Some(segment);
                    self.borders.segment_start = i + QUALIFIER_SEPARATOR.len();
                    return State::ScanIdentifier {
                        pos: self.borders.segment_start,
                    };
                }
                '[' if !segment.is_empty() => {
                    self.borders.component = Some(segment);
                    self.borders.segment_start = i + 1;
                    return State::ScanEnvironment { pos: i + 1 };
                }
                '@' if !segment.is_empty() => {
                    self.borders.component = Some(segment);
                    self.borders.segment_start = i + 1;
                    return State::ScanKey { pos: i + 1 };
                }
                _ => return self.restart(i),
            }
        }
        State::Exhausted
    }

    fn scan_environment(&mut self, pos: usize) -> State {
        for (i, c) in chars_from(self.text, pos) {
            if is_identifier_char(c) {
                continue;
            }
            let segment = self.borders.segment_start..i;
            if c == ']' && self.followed_by(i + 1, '@') && !segment.is_empty() {
                self.borders.environment = Some(segment);
                self.borders.segment_start = i + 2;
                return State::ScanKey { pos: i + 2 };
            }
            return self.restart(i);
        }
        State::Exhausted
    }

    fn scan_key(&mut self, pos: usize) -> State {
        for (i, c) in chars_from(self.text, pos) {
            if is_key_char(c) {
                continue;
            }
            let segment = self.borders.segment_start..i;
            if segment.is_empty() {
                return self.restart(i);
            }
            match c {
                ':' => {
                    self.borders.key = Some(segment);
                    self.borders.segment_start = i + 1;
                    return State::ScanDefault { pos: i + 1, depth: 1 };
                }
                '}' => {
                    self.borders.key = Some(segment);
                    return State::Closed { end: i + 1 };
                }
                _ => return self.restart(i),
            }
        }
        State::Exhausted
    }

    fn scan_default(&mut self, pos: usize, mut depth: usize) -> State {
        let default_start = self.borders.segment_start;
        let mut previous = None;
        let mut last_close = None;
        for (i, c) in chars_from(self.text, pos) {
            match c {
                '{' if matches!(previous, Some('$' | '#')) => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    last_close = Some(i);
                    if depth == 0 {
                        self.borders.default_value = Some(default_start..i);
                        return State::Closed { end: i + 1 };
                    }
                }
                _ => {}
            }
            previous = Some(c);
        }

        // Unbalanced: fall back to the last closing brace, if any.
        match last_close {
            Some(i) => {
                log::trace!("Unbalanced default value at {}; closing at {}", default_start, i);
                self.borders.default_value = Some(default_start..i);
                State::Closed { end: i + 1 }
            }
            None => State::Exhausted,
        }
    }

    fn finish(self, end: usize) -> Option<Span<'a>> {
        let Borders {
            start,
            config_type,
            component,
            environment,
            key,
            default_value,
            ..
        } = self.borders;
        let span = Span {
            text: self.text,
            range: start..end,
            config_type,
            component: component?,
            environment,
            key: key?,
            default_value,
        };
        log::trace!("Scanned placeholder '{}' at {}", span.as_str(), start);
        Some(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(text: &str) -> Option<&str> {
        find_next(text, 0).map(|span| span.as_str())
    }

    #[test]
    fn test_skips_malformed_prefixes() {
        let text = "hello ${rf} ${c1 ${c2 } @fsd}  ${app::component[dev]@value:${another}#{1+2}} ${}";
        assert_eq!(
            first(text),
            Some("${app::component[dev]@value:${another}#{1+2}}")
        );
    }

    #[test]
    fn test_parts_are_sliced() {
        let text = "x=${app::component[dev]@value:${another}#{1+2}}!";
        let span = find_next(text, 0).unwrap();
        assert_eq!(span.start(), 2);
        assert_eq!(span.end(), text.len() - 1);
        assert_eq!(span.config_type(), Some("app"));
        assert_eq!(span.component(), "component");
        assert_eq!(span.environment(), Some("dev"));
        assert_eq!(span.key(), "value");
        assert_eq!(span.default_value(), Some("${another}#{1+2}"));
    }

    #[test]
    fn test_nested_candidate_inside_identifier() {
        assert_eq!(
            first("${comp${c2@v2}onent[dev]@value:${another}#{1+2}}"),
            Some("${c2@v2}")
        );
        assert_eq!(first("${component@value${c2@v2}}"), Some("${c2@v2}"));
        assert_eq!(first("${component@${c2@v2}}"), Some("${c2@v2}"));
        assert_eq!(first("${${c1@v1}@${c2@v2}}"), Some("${c1@v1}"));
    }

    #[test]
    fn test_nested_default_value() {
        assert_eq!(
            first("${component@value:${c2@v2}}"),
            Some("${component@value:${c2@v2}}")
        );
        let span = find_next("${a@k:${b@k2:${c@k3}}} tail", 0).unwrap();
        assert_eq!(span.as_str(), "${a@k:${b@k2:${c@k3}}}");
        assert_eq!(span.default_value(), Some("${b@k2:${c@k3}}"));
    }

    #[test]
    fn test_unbalanced_default_uses_last_brace() {
        assert_eq!(
            first("${component@value:${c2@v2}"),
            Some("${component@value:${c2@v2}")
        );
        assert_eq!(first("${component@value:${v}"), Some("${component@value:${v}"));
        assert_eq!(first("${component@value:${v"), None);
    }

    #[test]
    fn test_empty_parts_are_rejected() {
        assert_eq!(first("${@} ${ @ } ${c@} ${@k} ${c@v}"), Some("${c@v}"));
        assert_eq!(first("${c[]@k} ${::c@k}"), None);
    }

    #[test]
    fn test_key_allows_path_separators() {
        let span = find_next(r"${files@conf/app\main.xml}", 0).unwrap();
        assert_eq!(span.key(), r"conf/app\main.xml");
        assert!(span.default_value().is_none());
        assert!(span.environment().is_none());
    }

    #[test]
    fn test_search_from_offset_and_absent() {
        let text = "${a@b} and ${c@d}";
        let second = find_next(text, 1).unwrap();
        assert_eq!(second.as_str(), "${c@d}");
        assert_eq!(second.start(), 11);
        assert!(find_next(text, 12).is_none());
        assert!(find_next(text, 100).is_none());
        assert!(find_next("no placeholders at all", 0).is_none());
        assert!(find_next("trailing ${", 0).is_none());
    }

    #[test]
    fn test_multibyte_text_is_scanned_by_char() {
        let text = "préfixe ${café@clé:défaut} ünd";
        let span = find_next(text, 0).unwrap();
        assert_eq!(span.as_str(), "${café@clé:défaut}");
        assert_eq!(span.component(), "café");
        assert_eq!(span.default_value(), Some("défaut"));
    }
}
