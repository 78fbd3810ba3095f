use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParsePathError {
    #[error("path must start with `.`")]
    MissingLeadingDot,
    #[error("empty field name at offset {0}")]
    EmptyField(usize),
    #[error("unclosed `{0}` selector")]
    UnclosedSelector(char),
    #[error("non-numeric index selector `{0}`")]
    BadIndex(String),
    #[error("unexpected character at offset {0}")]
    UnexpectedCharacter(usize),
}

/// Picks one row out of a list: either by position or by stringified id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `[N]`
    Index(usize),
    /// `#(ID)`; inside the parens `\` escapes `)` and `\`.
    Id(String),
}

/// One dot-separated path step: a field name followed by zero or more row
/// selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub field: String,
    pub selectors: Vec<Selector>,
}

/// A location in a query-result tree, e.g. `.user[2]` or `.post#(p-1).author`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<Segment>,
}

impl Path {
    /// The path addressing one top-level query field's row list.
    pub fn field(name: impl Into<String>) -> Path {
        Path {
            segments: vec![Segment {
                field: name.into(),
                selectors: Vec::new(),
            }],
        }
    }

    /// This path extended with an index selector on its last segment.
    pub fn at_index(&self, index: usize) -> Path {
        let mut path = self.clone();
        if let Some(last) = path.segments.last_mut() {
            last.selectors.push(Selector::Index(index));
        }
        path
    }
}

impl FromStr for Path {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Path, ParsePathError> {
        let mut chars = s.char_indices().peekable();
        match chars.next() {
            Some((_, '.')) => {}
            _ => return Err(ParsePathError::MissingLeadingDot),
        }

        let mut segments = Vec::new();
        loop {
            let start = chars.peek().map(|&(i, _)| i).unwrap_or(s.len());
            let mut field = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c == '.' || c == '[' || c == '#' {
                    break;
                }
                field.push(c);
                chars.next();
            }
            if field.is_empty() {
                return Err(ParsePathError::EmptyField(start));
            }

            let mut selectors = Vec::new();
            while let Some(&(_, c)) = chars.peek() {
                match c {
                    '[' => {
                        chars.next();
                        let mut digits = String::new();
                        loop {
                            match chars.next() {
                                Some((_, ']')) => break,
                                Some((_, d)) => digits.push(d),
                                None => return Err(ParsePathError::UnclosedSelector('[')),
                            }
                        }
                        let index = digits
                            .parse::<usize>()
                            .map_err(|_| ParsePathError::BadIndex(digits.clone()))?;
                        selectors.push(Selector::Index(index));
                    }
                    '#' => {
                        chars.next();
                        match chars.next() {
                            Some((_, '(')) => {}
                            _ => return Err(ParsePathError::UnclosedSelector('#')),
                        }
                        let mut id = String::new();
                        loop {
                            match chars.next() {
                                Some((_, ')')) => break,
                                Some((_, '\\')) => match chars.next() {
                                    Some((_, escaped)) => id.push(escaped),
                                    None => return Err(ParsePathError::UnclosedSelector('#')),
                                },
                                Some((_, c)) => id.push(c),
                                None => return Err(ParsePathError::UnclosedSelector('#')),
                            }
                        }
                        selectors.push(Selector::Id(id));
                    }
                    _ => break,
                }
            }

            segments.push(Segment { field, selectors });

            match chars.next() {
                None => break,
                Some((_, '.')) => continue,
                // A field character directly after a selector, e.g. `.a[0]x`.
                Some((i, _)) => return Err(ParsePathError::UnexpectedCharacter(i)),
            }
        }

        Ok(Path { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for segment in &self.segments {
            write!(f, ".{}", segment.field)?;
            for selector in &segment.selectors {
                match selector {
                    Selector::Index(n) => write!(f, "[{n}]")?,
                    Selector::Id(id) => {
                        f.write_str("#(")?;
                        for c in id.chars() {
                            if c == ')' || c == '\\' {
                                f.write_str("\\")?;
                            }
                            write!(f, "{c}")?;
                        }
                        f.write_str(")")?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Path, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
