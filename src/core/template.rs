//! JF-003: Template strings and metadata defaulting.
//!
//! Two placeholder syntaxes are supported:
//!
//! - [`Syntax::Dollar`] for recipe fragments and wrapper scripts:
//!   `${name}` is a placeholder, `$$` is a literal `$`, and any other `$`
//!   passes through so `$HOME` or `$(date)` need no escaping.
//! - [`Syntax::Brace`] for output paths and header directives:
//!   `{name}` is a placeholder, `{{` and `}}` are literal braces.
//!
//! Names may be dotted (`${run.seed}`) to reach into nested mappings.

use super::error::{Error, Result};
use super::types::Metadata;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml_ng::Value;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Placeholder syntax of a [`TemplateString`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Syntax {
    #[default]
    Dollar,
    Brace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// An immutable, pre-parsed text template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateString {
    source: String,
    syntax: Syntax,
    segments: Vec<Segment>,
}

impl TemplateString {
    /// Parse `source` with the given syntax.
    pub fn parse(source: &str, syntax: Syntax) -> Result<Self> {
        let segments = match syntax {
            Syntax::Dollar => parse_dollar(source)?,
            Syntax::Brace => parse_brace(source)?,
        };
        Ok(Self {
            source: source.to_string(),
            syntax,
            segments,
        })
    }

    pub fn dollar(source: &str) -> Result<Self> {
        Self::parse(source, Syntax::Dollar)
    }

    pub fn brace(source: &str) -> Result<Self> {
        Self::parse(source, Syntax::Brace)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    /// Names referenced by this template, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render against `mapping`. Every referenced name must resolve to a
    /// non-null scalar (or a sequence of scalars, which is space-joined).
    pub fn render(&self, mapping: &Metadata) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = lookup(mapping, name)
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| Error::UnresolvedPlaceholder {
                            name: name.clone(),
                            template: self.source.clone(),
                        })?;
                    let text = value_text(value).ok_or_else(|| {
                        Error::config(format!(
                            "placeholder '{}' in \"{}\" does not refer to a scalar value",
                            name, self.source
                        ))
                    })?;
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for TemplateString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for TemplateString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// Deserializes as a [`Syntax::Dollar`] template (the recipe syntax).
impl<'de> Deserialize<'de> for TemplateString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::dollar(&source).map_err(serde::de::Error::custom)
    }
}

/// Render `template` against `mapping` in one step.
pub fn render(template: &str, syntax: Syntax, mapping: &Metadata) -> Result<String> {
    TemplateString::parse(template, syntax)?.render(mapping)
}

/// Fill every key of `target` that is missing or null from `defaults`,
/// recursing into nested mappings. Present non-null values are never
/// overwritten, at any depth.
pub fn fill_defaults(target: &Metadata, defaults: &Metadata) -> Metadata {
    let mut out = target.clone();
    for (key, default) in defaults {
        match out.get_mut(key) {
            Some(slot) => {
                let filled = fill_value(slot, default);
                *slot = filled;
            }
            None => {
                out.insert(key.clone(), default.clone());
            }
        }
    }
    out
}

fn fill_value(target: &Value, default: &Value) -> Value {
    match (target, default) {
        (Value::Null, _) => default.clone(),
        (Value::Mapping(present), Value::Mapping(defaults)) => {
            let mut merged = present.clone();
            for (key, dv) in defaults {
                let next = match merged.get(key) {
                    Some(tv) => fill_value(tv, dv),
                    None => dv.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Mapping(merged)
        }
        _ => target.clone(),
    }
}

/// Look up a possibly dotted name. An exact key match wins over a nested
/// path so keys containing dots stay addressable.
pub fn lookup<'a>(mapping: &'a Metadata, name: &str) -> Option<&'a Value> {
    if let Some(v) = mapping.get(name) {
        return Some(v);
    }
    let mut parts = name.split('.');
    let mut current = mapping.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Text form of a metadata value, if it has one.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::Sequence(_) | Value::Mapping(_) | Value::Null => None,
                scalar => value_text(scalar),
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(" ")),
        Value::Tagged(tagged) => value_text(&tagged.value),
        Value::Null | Value::Mapping(_) => None,
    }
}

fn parse_dollar(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if ch != '$' {
            literal.push(ch);
            continue;
        }
        match chars.peek() {
            Some((_, '$')) => {
                chars.next();
                literal.push('$');
            }
            Some((_, '{')) => {
                chars.next();
                let name = take_name(&mut chars, pos, source)?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            _ => literal.push('$'),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_brace(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' => {
                if let Some((_, '{')) = chars.peek() {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                let name = take_name(&mut chars, pos, source)?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => {
                if let Some((_, '}')) = chars.peek() {
                    chars.next();
                }
                literal.push('}');
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Consume up to and including the closing `}` and return the trimmed name.
fn take_name(chars: &mut Peekable<CharIndices<'_>>, open: usize, source: &str) -> Result<String> {
    let mut name = String::new();
    for (_, c) in chars.by_ref() {
        if c == '}' {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::config(format!(
                    "empty placeholder at position {} in \"{}\"",
                    open, source
                )));
            }
            return Ok(name.to_string());
        }
        name.push(c);
    }
    Err(Error::UnclosedPlaceholder {
        position: open,
        template: source.to_string(),
    })
}
