//! Reference paths: parsing, selection, and result injection.
//!
//! Supported syntax is deliberately small:
//!
//! - `$` the current document, `$$` the context object
//! - `.name` and `['any name']` select object fields
//! - `[3]` selects an array element, `[-1]` counts from the end
//!
//! Selecting a field or index that does not exist is an error, never a
//! silent `null`.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while parsing or applying a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path '{path}': {reason}")]
    Syntax { path: String, reason: String },

    #[error("path '{path}' did not resolve: {reason}")]
    Missing { path: String, reason: String },

    #[error("path '{path}' resolved to {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("cannot place result at '{path}': {reason}")]
    Inject { path: String, reason: String },
}

/// Which value a path is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    /// `$`
    Document,
    /// `$$`
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(i64),
}

/// A parsed reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    root: PathRoot,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// The identity path `$`.
    pub fn identity() -> Self {
        Self {
            source: "$".to_string(),
            root: PathRoot::Document,
            segments: Vec::new(),
        }
    }

    pub fn parse(source: &str) -> Result<Self, PathError> {
        let trimmed = source.trim();
        let syntax = |reason: &str| PathError::Syntax {
            path: trimmed.to_string(),
            reason: reason.to_string(),
        };

        let (root, rest) = if let Some(rest) = trimmed.strip_prefix("$$") {
            (PathRoot::Context, rest)
        } else if let Some(rest) = trimmed.strip_prefix('$') {
            (PathRoot::Document, rest)
        } else {
            return Err(syntax("must start with '$'"));
        };

        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    if start == i {
                        return Err(syntax("empty field name"));
                    }
                    let name: String = chars[start..i].iter().collect();
                    if name.chars().any(char::is_whitespace) {
                        return Err(syntax("whitespace in field name; use ['...'] instead"));
                    }
                    segments.push(Segment::Field(name));
                }
                '[' => {
                    i += 1;
                    if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
                        let quote = chars[i];
                        i += 1;
                        let mut name = String::new();
                        loop {
                            match chars.get(i) {
                                None => return Err(syntax("unterminated quoted field")),
                                Some('\\') if i + 1 < chars.len() => {
                                    name.push(chars[i + 1]);
                                    i += 2;
                                }
                                Some(c) if *c == quote => {
                                    i += 1;
                                    break;
                                }
                                Some(c) => {
                                    name.push(*c);
                                    i += 1;
                                }
                            }
                        }
                        if chars.get(i) != Some(&']') {
                            return Err(syntax("expected ']' after quoted field"));
                        }
                        i += 1;
                        segments.push(Segment::Field(name));
                    } else {
                        let start = i;
                        while i < chars.len() && chars[i] != ']' {
                            i += 1;
                        }
                        if i >= chars.len() {
                            return Err(syntax("unterminated '['"));
                        }
                        let raw: String = chars[start..i].iter().collect();
                        let index = raw
                            .trim()
                            .parse::<i64>()
                            .map_err(|_| syntax(&format!("'{raw}' is not an array index")))?;
                        i += 1;
                        segments.push(Segment::Index(index));
                    }
                }
                other => {
                    return Err(syntax(&format!("unexpected character '{other}'")));
                }
            }
        }

        Ok(Self {
            source: trimmed.to_string(),
            root,
            segments,
        })
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// `$` with no segments.
    pub fn is_identity(&self) -> bool {
        self.root == PathRoot::Document && self.segments.is_empty()
    }

    pub fn has_negative_index(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Index(i) if *i < 0))
    }

    /// Select the addressed value. `context` backs `$$` paths.
    pub fn select<'a>(&self, document: &'a Value, context: &'a Value) -> Result<&'a Value, PathError> {
        let mut current = match self.root {
            PathRoot::Document => document,
            PathRoot::Context => context,
        };

        for (depth, segment) in self.segments.iter().enumerate() {
            current = match (segment, current) {
                (Segment::Field(name), Value::Object(map)) => {
                    map.get(name).ok_or_else(|| self.missing(depth, format!("no field '{name}'")))?
                }
                (Segment::Field(name), other) => {
                    return Err(self.missing(
                        depth,
                        format!("cannot read field '{name}' of {}", describe(other)),
                    ));
                }
                (Segment::Index(index), Value::Array(items)) => {
                    let resolved = resolve_index(*index, items.len()).ok_or_else(|| {
                        self.missing(
                            depth,
                            format!("index {index} out of bounds for array of length {}", items.len()),
                        )
                    })?;
                    &items[resolved]
                }
                (Segment::Index(index), other) => {
                    return Err(self.missing(
                        depth,
                        format!("cannot index [{index}] into {}", describe(other)),
                    ));
                }
            };
        }

        Ok(current)
    }

    /// Place `value` inside `target` at this path, creating intermediate
    /// objects as needed. `$` replaces the whole document.
    pub fn inject(&self, target: Value, value: Value) -> Result<Value, PathError> {
        if self.root == PathRoot::Context {
            return Err(PathError::Inject {
                path: self.source.clone(),
                reason: "the context object is read-only".to_string(),
            });
        }
        let mut target = target;
        self.inject_at(&mut target, 0, value)?;
        Ok(target)
    }

    fn inject_at(&self, slot: &mut Value, depth: usize, value: Value) -> Result<(), PathError> {
        let Some(segment) = self.segments.get(depth) else {
            *slot = value;
            return Ok(());
        };

        match segment {
            Segment::Field(name) => {
                if slot.is_null() {
                    *slot = Value::Object(Map::new());
                }
                match slot {
                    Value::Object(map) => {
                        let child = map.entry(name.clone()).or_insert(Value::Null);
                        self.inject_at(child, depth + 1, value)
                    }
                    other => Err(PathError::Inject {
                        path: self.source.clone(),
                        reason: format!("cannot set field '{name}' on {}", describe(other)),
                    }),
                }
            }
            Segment::Index(index) => {
                match slot {
                    Value::Array(items) => {
                        let len = items.len();
                        let resolved = resolve_index(*index, len).ok_or_else(|| PathError::Inject {
                            path: self.source.clone(),
                            reason: format!("index {index} out of bounds for array of length {len}"),
                        })?;
                        self.inject_at(&mut items[resolved], depth + 1, value)
                    }
                    other => Err(PathError::Inject {
                        path: self.source.clone(),
                        reason: format!("cannot index [{index}] into {}", describe(other)),
                    }),
                }
            }
        }
    }

    fn missing(&self, depth: usize, reason: String) -> PathError {
        let prefix = JsonPath {
            source: String::new(),
            root: self.root,
            segments: self.segments[..depth].to_vec(),
        };
        PathError::Missing {
            path: self.source.clone(),
            reason: format!("{reason} at '{}'", prefix.render()),
        }
    }

    fn render(&self) -> String {
        let mut out = match self.root {
            PathRoot::Document => "$".to_string(),
            PathRoot::Context => "$$".to_string(),
        };
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                Segment::Index(i) => out.push_str(&format!("[{i}]")),
            }
        }
        out
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Short description of a JSON value's type, for error messages.
pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
