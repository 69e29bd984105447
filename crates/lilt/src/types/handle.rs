//! Opaque host resources.
//!
//! A handle wraps a host object behind a kind symbol and a fixed set of
//! operations. The core ships regex handles (a compiled pattern), regex
//! match handles (one match result), and writable file handles for the
//! `stdio` package.

use std::fs::File;
use std::ops::Range;

use fancy_regex::Regex;

use crate::intern::{KnownSymbol, SymbolId};

/// A host resource.
#[derive(Debug)]
pub enum Handle {
    Regex(RegexHandle),
    RegexMatch(RegexMatchHandle),
    File(FileHandle),
}

impl Handle {
    /// The kind symbol of this handle.
    #[must_use]
    pub fn kind_symbol(&self) -> SymbolId {
        match self {
            Self::Regex(_) => KnownSymbol::Regex.id(),
            Self::RegexMatch(_) => KnownSymbol::RegexMatch.id(),
            Self::File(_) => KnownSymbol::File.id(),
        }
    }
}

/// A compiled host regex.
#[derive(Debug)]
pub struct RegexHandle {
    pub pattern: Box<str>,
    pub regex: Regex,
}

impl RegexHandle {
    /// Compiles a pattern; the host engine's error text is surfaced as-is.
    pub fn compile(pattern: &str) -> Result<Self, String> {
        match Regex::new(pattern) {
            Ok(regex) => Ok(Self {
                pattern: pattern.into(),
                regex,
            }),
            Err(e) => Err(e.to_string()),
        }
    }

    /// True when the pattern matches anywhere in `input`.
    pub fn is_match(&self, input: &str) -> Result<bool, String> {
        self.regex.is_match(input).map_err(|e| e.to_string())
    }

    /// The first match, or `None`.
    pub fn find(&self, input: &str) -> Result<Option<RegexMatchHandle>, String> {
        match self.regex.captures(input) {
            Ok(Some(captures)) => {
                let whole = captures.get(0).ok_or_else(|| String::from("match without group 0"))?;
                let mut named = Vec::new();
                for name in self.regex.capture_names().flatten() {
                    if let Some(group) = captures.name(name) {
                        named.push((name.to_owned(), group.as_str().to_owned()));
                    }
                }
                Ok(Some(RegexMatchHandle {
                    input: input.into(),
                    range: whole.range(),
                    text: whole.as_str().into(),
                    named,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Splits `input` on matches of the pattern.
    pub fn split(&self, input: &str) -> Result<Vec<String>, String> {
        let mut pieces = Vec::new();
        let mut last = 0;
        let mut cursor = 0;
        while cursor <= input.len() {
            match self.regex.find_from_pos(input, cursor) {
                Ok(Some(found)) => {
                    pieces.push(input[last..found.start()].to_owned());
                    last = found.end();
                    // A zero-width match must still advance the scan.
                    cursor = if found.end() == found.start() {
                        found.end() + 1
                    } else {
                        found.end()
                    };
                }
                Ok(None) => break,
                Err(e) => return Err(e.to_string()),
            }
        }
        pieces.push(input[last.min(input.len())..].to_owned());
        Ok(pieces)
    }

    /// Replaces every match with a literal replacement string.
    pub fn replace_all(&self, input: &str, replacement: &str) -> Result<String, String> {
        Ok(self.regex.replace_all(input, replacement).into_owned())
    }
}

/// One regex match result.
#[derive(Debug)]
pub struct RegexMatchHandle {
    /// The searched input, kept so `before`/`after` slice cheaply.
    pub input: Box<str>,
    /// Byte range of the whole match in `input`.
    pub range: Range<usize>,
    /// The matched text.
    pub text: Box<str>,
    /// Named-capture results.
    pub named: Vec<(String, String)>,
}

impl RegexMatchHandle {
    /// The input text before the match.
    #[must_use]
    pub fn before(&self) -> &str {
        &self.input[..self.range.start]
    }

    /// The input text after the match.
    #[must_use]
    pub fn after(&self) -> &str {
        &self.input[self.range.end..]
    }

    /// A named capture's text.
    #[must_use]
    pub fn named_capture(&self, name: &str) -> Option<&str> {
        self.named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, text)| text.as_str())
    }
}

/// A writable host file (stdout or a real file from the stdio package).
#[derive(Debug)]
pub enum FileHandle {
    Stdout,
    Stderr,
    File(File),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_match() {
        let re = RegexHandle::compile(r"\d+").expect("valid pattern");
        assert_eq!(re.is_match("abc 123"), Ok(true));
        assert_eq!(re.is_match("abc"), Ok(false));
    }

    #[test]
    fn match_exposes_before_after_and_range() {
        let re = RegexHandle::compile(r"\d+").expect("valid pattern");
        let m = re.find("ab 42 cd").expect("no engine error").expect("matches");
        assert_eq!(m.before(), "ab ");
        assert_eq!(m.after(), " cd");
        assert_eq!(&*m.text, "42");
        assert_eq!(m.range, 3..5);
    }

    #[test]
    fn named_captures_are_reachable() {
        let re = RegexHandle::compile(r"(?P<word>[a-z]+)").expect("valid pattern");
        let m = re.find("hello").expect("no engine error").expect("matches");
        assert_eq!(m.named_capture("word"), Some("hello"));
        assert_eq!(m.named_capture("missing"), None);
    }

    #[test]
    fn split_and_replace() {
        let re = RegexHandle::compile(r",\s*").expect("valid pattern");
        assert_eq!(
            re.split("a, b,c").expect("no engine error"),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert_eq!(re.replace_all("a, b", "; ").expect("no engine error"), "a; b");
    }

    #[test]
    fn bad_pattern_reports_engine_error() {
        assert!(RegexHandle::compile("(unclosed").is_err());
    }
}
