//! Detector label maps in the protobuf text form.
//!
//! ```text
//! item {
//!   id: 1
//!   name: "deer"
//!   display_name: "Deer"
//! }
//! ```
//!
//! Parsing is liberal about whitespace, commas, and quote style. Unknown
//! keys inside an item are ignored.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::BboxeeError;

/// Label used for class ids that are missing from the map.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Class id to display string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: BTreeMap<i64, String>,
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Str(String),
    Colon,
    Open,
    Close,
}

/// Parse failure with the byte offset where it happened.
#[derive(Debug, PartialEq)]
pub struct LabelMapSyntaxError {
    pub offset: usize,
    pub message: String,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: i64, label: impl Into<String>) {
        self.labels.insert(id, label.into());
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Display label for `id`, or [`UNKNOWN_LABEL`].
    pub fn label(&self, id: i64) -> &str {
        self.labels
            .get(&id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.labels.iter().map(|(id, label)| (*id, label.as_str()))
    }

    /// Builds a 1-based map from an ordered vocabulary.
    pub fn from_vocabulary(labels: &[String]) -> Self {
        let mut map = Self::new();
        for (idx, label) in labels.iter().enumerate() {
            map.insert(idx as i64 + 1, label.clone());
        }
        map
    }

    /// Reads and parses a label map file.
    pub fn from_path(path: &Path) -> Result<Self, BboxeeError> {
        let text = fs::read_to_string(path).map_err(|err| BboxeeError::from_io(path, err))?;
        Self::parse(&text).map_err(|err| BboxeeError::LabelMapParse {
            path: path.to_path_buf(),
            offset: err.offset,
            message: err.message,
        })
    }

    /// Parses the text form. `display_name` wins over `name` when both exist.
    pub fn parse(text: &str) -> Result<Self, LabelMapSyntaxError> {
        let tokens = tokenize(text)?;
        let mut map = Self::new();
        let mut pos = 0;

        while pos < tokens.len() {
            let (offset, token) = &tokens[pos];
            match token {
                Token::Ident(word) if word.eq_ignore_ascii_case("item") => {
                    pos += 1;
                    if let Some((_, Token::Colon)) = tokens.get(pos) {
                        pos += 1;
                    }
                    match tokens.get(pos) {
                        Some((_, Token::Open)) => pos += 1,
                        _ => {
                            return Err(LabelMapSyntaxError {
                                offset: *offset,
                                message: "expected '{' after 'item'".to_string(),
                            })
                        }
                    }
                    let (id, label, next) = parse_item(&tokens, pos, *offset)?;
                    pos = next;
                    if let (Some(id), Some(label)) = (id, label) {
                        map.insert(id, label);
                    }
                }
                _ => {
                    return Err(LabelMapSyntaxError {
                        offset: *offset,
                        message: "expected 'item'".to_string(),
                    })
                }
            }
        }

        Ok(map)
    }

    /// Renders the map in the text form, one item per id.
    pub fn to_pbtxt(&self) -> String {
        let mut out = String::new();
        for (id, label) in &self.labels {
            let escaped = label.replace('\\', "\\\\").replace('\'', "\\'");
            let _ = write!(out, "item {{\n  id: {id}\n  name: '{escaped}'\n}}\n");
        }
        out
    }
}

fn parse_item(
    tokens: &[(usize, Token<'_>)],
    mut pos: usize,
    item_offset: usize,
) -> Result<(Option<i64>, Option<String>, usize), LabelMapSyntaxError> {
    let mut id = None;
    let mut name = None;
    let mut display_name = None;

    loop {
        let Some((offset, token)) = tokens.get(pos) else {
            return Err(LabelMapSyntaxError {
                offset: item_offset,
                message: "unterminated item".to_string(),
            });
        };

        match token {
            Token::Close => {
                pos += 1;
                break;
            }
            Token::Ident(key) => {
                let key = *key;
                pos += 1;
                if let Some((_, Token::Colon)) = tokens.get(pos) {
                    pos += 1;
                }
                let Some((value_offset, value)) = tokens.get(pos) else {
                    return Err(LabelMapSyntaxError {
                        offset: *offset,
                        message: format!("missing value for '{key}'"),
                    });
                };
                let value = match value {
                    Token::Str(s) => s.clone(),
                    Token::Ident(raw) => raw.to_string(),
                    _ => {
                        return Err(LabelMapSyntaxError {
                            offset: *value_offset,
                            message: format!("invalid value for '{key}'"),
                        })
                    }
                };
                pos += 1;

                match key {
                    "id" => {
                        id = Some(value.parse::<i64>().map_err(|_| LabelMapSyntaxError {
                            offset: *value_offset,
                            message: format!("id '{value}' is not an integer"),
                        })?);
                    }
                    "name" => name = Some(value),
                    "display_name" => display_name = Some(value),
                    _ => {}
                }
            }
            _ => {
                return Err(LabelMapSyntaxError {
                    offset: *offset,
                    message: "expected a key or '}'".to_string(),
                })
            }
        }
    }

    Ok((id, display_name.or(name), pos))
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token<'_>)>, LabelMapSyntaxError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' | b',' | b';' => i += 1,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b':' => {
                tokens.push((i, Token::Colon));
                i += 1;
            }
            b'{' => {
                tokens.push((i, Token::Open));
                i += 1;
            }
            b'}' => {
                tokens.push((i, Token::Close));
                i += 1;
            }
            b'"' | b'\'' => {
                let start = i;
                let quote = c;
                let mut value = String::new();
                let mut closed = false;
                let mut escaped = false;
                i = bytes.len();
                for (rel, ch) in text[start + 1..].char_indices() {
                    if escaped {
                        value.push(ch);
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch as u32 == quote as u32 {
                        closed = true;
                        i = start + 1 + rel + 1;
                        break;
                    } else {
                        value.push(ch);
                    }
                }
                if !closed {
                    return Err(LabelMapSyntaxError {
                        offset: start,
                        message: "unterminated string".to_string(),
                    });
                }
                tokens.push((start, Token::Str(value)));
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !matches!(
                        bytes[i],
                        b' ' | b'\t' | b'\r' | b'\n' | b',' | b';' | b':' | b'{' | b'}' | b'"'
                            | b'\''
                            | b'#'
                    )
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(&text[start..i])));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_quoting_and_display_names() {
        let text = r#"
            item {
              name: "/m/01"
              id: 1
              display_name: "Deer"
            }
            item{id:2 name:'elk'}
            item {
                id: 3,
                name: "bear",
            }
        "#;
        let map = LabelMap::parse(text).expect("parse");
        assert_eq!(map.len(), 3);
        assert_eq!(map.label(1), "Deer");
        assert_eq!(map.label(2), "elk");
        assert_eq!(map.label(3), "bear");
        assert_eq!(map.label(99), UNKNOWN_LABEL);
    }

    #[test]
    fn rejects_unterminated_item() {
        let err = LabelMap::parse("item { id: 1 name: 'x'").unwrap_err();
        assert_eq!(err.message, "unterminated item");
    }

    #[test]
    fn rejects_non_integer_id() {
        let err = LabelMap::parse("item { id: one name: 'x' }").unwrap_err();
        assert!(err.message.contains("not an integer"));
    }

    #[test]
    fn pbtxt_roundtrip() {
        let map = LabelMap::from_vocabulary(&["animal".to_string(), "o'possum".to_string()]);
        let text = map.to_pbtxt();
        assert!(text.starts_with("item {\n  id: 1\n  name: 'animal'\n}\n"));
        assert_eq!(LabelMap::parse(&text).expect("parse"), map);
    }
}
