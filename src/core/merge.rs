//! JF-004: Record merging with priority order.
//!
//! A record is a set of independently present-or-absent fields. Merging
//! fills the gaps of the primary record from the secondary one: presence
//! wins over absence whichever side it is on, the primary wins when both
//! sides are present, and nested records are merged recursively. Merging
//! never mutates its inputs, and it is not commutative.

use super::error::{Error, Result};
use super::template::{Syntax, TemplateString};
use super::types::Metadata;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml_ng::Value;
use std::path::PathBuf;

/// Gap-filling merge; `self` is the primary side.
pub trait Merge: Sized {
    fn merge(&self, secondary: &Self) -> Self;
}

/// Merge two optional records. An absent record is the identity.
pub fn merge<R: Merge + Clone>(primary: Option<&R>, secondary: Option<&R>) -> Option<R> {
    match (primary, secondary) {
        (Some(p), Some(s)) => Some(p.merge(s)),
        (Some(p), None) => Some(p.clone()),
        (None, Some(s)) => Some(s.clone()),
        (None, None) => None,
    }
}

/// Merge layers given highest priority first.
pub fn merge_layers<'a, R, I>(layers: I) -> Option<R>
where
    R: Merge + Clone + 'a,
    I: IntoIterator<Item = Option<&'a R>>,
{
    layers
        .into_iter()
        .fold(None, |acc: Option<R>, layer| merge(acc.as_ref(), layer))
}

impl<T: Merge + Clone> Merge for Option<T> {
    fn merge(&self, secondary: &Self) -> Self {
        merge(self.as_ref(), secondary.as_ref())
    }
}

impl<T: Merge + Clone> Merge for IndexMap<String, T> {
    fn merge(&self, secondary: &Self) -> Self {
        let mut out = self.clone();
        for (key, theirs) in secondary {
            let merged = match out.get(key) {
                Some(ours) => ours.merge(theirs),
                None => theirs.clone(),
            };
            out.insert(key.clone(), merged);
        }
        out
    }
}

macro_rules! scalar_merge {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Merge for $ty {
                fn merge(&self, _secondary: &Self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

scalar_merge!(String, bool, i64, u32, u64, usize, PathBuf);

/// Implement [`Merge`] field by field for a record struct.
#[macro_export]
macro_rules! merge_record {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::core::merge::Merge for $ty {
            fn merge(&self, secondary: &Self) -> Self {
                Self {
                    $($field: $crate::core::merge::Merge::merge(&self.$field, &secondary.$field)),*
                }
            }
        }
    };
}

// ============================================================================
// Templated fields
// ============================================================================

/// A scalar field with a companion template. The template is only
/// consulted when no direct value is present; the two halves merge
/// independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Templated {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl Templated {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            template: None,
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        Self {
            value: None,
            template: Some(template.into()),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none() && self.template.is_none()
    }

    /// Direct value if set, else the `{name}` template rendered with
    /// `metadata`, else absent.
    pub fn resolve(&self, metadata: &Metadata) -> Result<Option<String>> {
        if let Some(value) = &self.value {
            return Ok(Some(value.clone()));
        }
        match &self.template {
            Some(template) => Ok(Some(
                TemplateString::parse(template, Syntax::Brace)?.render(metadata)?,
            )),
            None => Ok(None),
        }
    }
}

merge_record!(Templated { value, template });

/// A templated field is written either as a bare scalar (the value) or as
/// `{ value, template }`.
impl<'de> Deserialize<'de> for Templated {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Pair {
            #[serde(default)]
            value: Option<Value>,
            #[serde(default)]
            template: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Pair(Pair),
            Scalar(Value),
        }

        let scalar = |v: Value| -> std::result::Result<Option<String>, D::Error> {
            match v {
                Value::Null => Ok(None),
                Value::String(s) => Ok(Some(s)),
                Value::Number(n) => Ok(Some(n.to_string())),
                Value::Bool(b) => Ok(Some(b.to_string())),
                other => Err(serde::de::Error::custom(format!(
                    "expected a scalar directive value, got {:?}",
                    other
                ))),
            }
        };

        match Repr::deserialize(deserializer)? {
            Repr::Pair(pair) => Ok(Self {
                value: match pair.value {
                    Some(v) => scalar(v)?,
                    None => None,
                },
                template: pair.template,
            }),
            Repr::Scalar(v) => Ok(Self {
                value: scalar(v)?,
                template: None,
            }),
        }
    }
}

// ============================================================================
// Dynamic records
// ============================================================================

/// Merge two YAML records. Null is absence; mappings merge recursively; a
/// mapping on one side and a present scalar on the other is a shape
/// conflict.
pub fn merge_values(primary: &Value, secondary: &Value) -> Result<Value> {
    merge_value_at("", primary, secondary)
}

/// [`merge_values`] over top-level metadata.
pub fn merge_metadata(primary: &Metadata, secondary: &Metadata) -> Result<Metadata> {
    let mut out = primary.clone();
    for (key, theirs) in secondary {
        let merged = match out.get(key) {
            Some(ours) => merge_value_at(key, ours, theirs)?,
            None => theirs.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Ok(out)
}

fn merge_value_at(path: &str, primary: &Value, secondary: &Value) -> Result<Value> {
    match (primary, secondary) {
        (Value::Null, other) => Ok(other.clone()),
        (ours, Value::Null) => Ok(ours.clone()),
        (Value::Mapping(ours), Value::Mapping(theirs)) => {
            let mut out = ours.clone();
            for (key, tv) in theirs {
                let child = match key.as_str() {
                    Some(k) if path.is_empty() => k.to_string(),
                    Some(k) => format!("{}.{}", path, k),
                    None => format!("{}.{:?}", path, key),
                };
                let merged = match out.get(key) {
                    Some(ov) => merge_value_at(&child, ov, tv)?,
                    None => tv.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Ok(Value::Mapping(out))
        }
        (Value::Mapping(_), _) | (_, Value::Mapping(_)) => Err(Error::config(format!(
            "cannot merge '{}': a mapping and a scalar",
            if path.is_empty() { "<root>" } else { path }
        ))),
        (ours, _) => Ok(ours.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Inner {
        depth: Option<u32>,
        label: Option<String>,
    }
    merge_record!(Inner { depth, label });

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Outer {
        x: Option<i64>,
        name: Option<String>,
        inner: Option<Inner>,
        directive: Templated,
    }
    merge_record!(Outer { x, name, inner, directive });

    fn outer(x: Option<i64>) -> Outer {
        Outer {
            x,
            ..Default::default()
        }
    }

    #[test]
    fn test_jf004_not_commutative() {
        let a = outer(Some(1));
        let b = outer(Some(2));
        assert_eq!(a.merge(&b).x, Some(1));
        assert_eq!(b.merge(&a).x, Some(2));
    }

    #[test]
    fn test_jf004_presence_beats_absence_either_side() {
        let a = outer(None);
        let b = outer(Some(2));
        assert_eq!(a.merge(&b).x, Some(2));
        assert_eq!(b.merge(&a).x, Some(2));
        assert_eq!(a.merge(&a).x, None);
    }

    #[test]
    fn test_jf004_absent_record_identity() {
        let a = outer(Some(1));
        assert_eq!(merge(Some(&a), None), Some(a.clone()));
        assert_eq!(merge(None, Some(&a)), Some(a.clone()));
        assert_eq!(merge::<Outer>(None, None), None);
    }

    #[test]
    fn test_jf004_inputs_unchanged() {
        let a = outer(None);
        let b = outer(Some(5));
        let a_before = a.clone();
        let b_before = b.clone();
        let _ = a.merge(&b);
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn test_jf004_nested_recurses() {
        let a = Outer {
            inner: Some(Inner {
                depth: Some(1),
                label: None,
            }),
            ..Default::default()
        };
        let b = Outer {
            inner: Some(Inner {
                depth: Some(9),
                label: Some("from-b".to_string()),
            }),
            ..Default::default()
        };
        let merged = a.merge(&b).inner.unwrap();
        assert_eq!(merged.depth, Some(1));
        assert_eq!(merged.label.as_deref(), Some("from-b"));
    }

    #[test]
    fn test_jf004_merge_layers_priority() {
        let high = outer(None);
        let mid = outer(Some(2));
        let low = outer(Some(3));
        let merged = merge_layers([Some(&high), Some(&mid), None, Some(&low)]).unwrap();
        assert_eq!(merged.x, Some(2));
        assert!(merge_layers::<Outer, _>([None, None]).is_none());
    }

    #[test]
    fn test_jf004_templated_halves_merge_independently() {
        let a = Templated::template("1-{array_count}%4");
        let b = Templated::value("1-3");
        let merged = a.merge(&b);
        assert_eq!(merged.value.as_deref(), Some("1-3"));
        assert_eq!(merged.template.as_deref(), Some("1-{array_count}%4"));
        // a value anywhere in the chain wins over a template
        assert_eq!(merged.resolve(&Metadata::new()).unwrap().as_deref(), Some("1-3"));
    }

    #[test]
    fn test_jf004_templated_resolve() {
        let mut meta = Metadata::new();
        meta.insert("array_count".to_string(), Value::Number(4.into()));
        assert_eq!(
            Templated::template("1-{array_count}").resolve(&meta).unwrap().as_deref(),
            Some("1-4")
        );
        assert_eq!(Templated::default().resolve(&meta).unwrap(), None);
        assert!(Templated::template("{missing}").resolve(&meta).is_err());
    }

    #[test]
    fn test_jf004_templated_deserialize_forms() {
        let t: Templated = serde_yaml_ng::from_str("8G").unwrap();
        assert_eq!(t, Templated::value("8G"));
        let t: Templated = serde_yaml_ng::from_str("4").unwrap();
        assert_eq!(t, Templated::value("4"));
        let t: Templated = serde_yaml_ng::from_str("template: '{name}.out'").unwrap();
        assert_eq!(t, Templated::template("{name}.out"));
        let t: Templated = serde_yaml_ng::from_str("{value: 2, template: '{n}'}").unwrap();
        assert_eq!(t.value.as_deref(), Some("2"));
        assert_eq!(t.template.as_deref(), Some("{n}"));
        assert!(serde_yaml_ng::from_str::<Templated>("[1, 2]").is_err());
    }

    #[test]
    fn test_jf004_indexmap_merge() {
        let mut a: IndexMap<String, Templated> = IndexMap::new();
        a.insert("gres".to_string(), Templated::value("gpu:1"));
        let mut b: IndexMap<String, Templated> = IndexMap::new();
        b.insert("gres".to_string(), Templated::value("gpu:4"));
        b.insert("constraint".to_string(), Templated::value("a100"));
        let merged = a.merge(&b);
        assert_eq!(merged["gres"].value.as_deref(), Some("gpu:1"));
        assert_eq!(merged["constraint"].value.as_deref(), Some("a100"));
        let keys: Vec<_> = merged.keys().collect();
        assert_eq!(keys, vec!["gres", "constraint"]);
    }

    #[test]
    fn test_jf004_merge_values_recursive() {
        let a: Value = serde_yaml_ng::from_str("x: 1\nn: {a: 1, b: null}").unwrap();
        let b: Value = serde_yaml_ng::from_str("x: 2\ny: 3\nn: {b: 2, c: 3}").unwrap();
        let m = merge_values(&a, &b).unwrap();
        assert_eq!(m["x"], Value::Number(1.into()));
        assert_eq!(m["y"], Value::Number(3.into()));
        assert_eq!(m["n"]["a"], Value::Number(1.into()));
        assert_eq!(m["n"]["b"], Value::Number(2.into()));
        assert_eq!(m["n"]["c"], Value::Number(3.into()));
    }

    #[test]
    fn test_jf004_merge_values_not_commutative() {
        let a: Value = serde_yaml_ng::from_str("x: 1").unwrap();
        let b: Value = serde_yaml_ng::from_str("x: 2").unwrap();
        assert_eq!(merge_values(&a, &b).unwrap()["x"], Value::Number(1.into()));
        assert_eq!(merge_values(&b, &a).unwrap()["x"], Value::Number(2.into()));
    }

    #[test]
    fn test_jf004_merge_values_shape_conflict() {
        let a: Value = serde_yaml_ng::from_str("opt: 1").unwrap();
        let b: Value = serde_yaml_ng::from_str("opt: {nested: true}").unwrap();
        let err = merge_values(&a, &b).unwrap_err();
        assert!(err.to_string().contains("opt"));
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_jf004_merge_metadata() {
        let a: Metadata = serde_yaml_ng::from_str("lr: 0.1").unwrap();
        let b: Metadata = serde_yaml_ng::from_str("lr: 0.5\nepochs: 3").unwrap();
        let m = merge_metadata(&a, &b).unwrap();
        assert_eq!(m["lr"].as_f64(), Some(0.1));
        assert_eq!(m["epochs"].as_u64(), Some(3));
    }

    fn arb_outer() -> impl Strategy<Value = Outer> {
        (
            proptest::option::of(any::<i64>()),
            proptest::option::of("[a-z]{0,4}"),
            proptest::option::of((proptest::option::of(any::<u32>()), proptest::option::of("[a-z]{0,4}"))),
        )
            .prop_map(|(x, name, inner)| Outer {
                x,
                name,
                inner: inner.map(|(depth, label)| Inner { depth, label }),
                directive: Templated::default(),
            })
    }

    proptest! {
        #[test]
        fn test_jf004_identity_and_purity(a in arb_outer(), b in arb_outer()) {
            let (a0, b0) = (a.clone(), b.clone());
            let merged = a.merge(&b);
            prop_assert_eq!(&a, &a0);
            prop_assert_eq!(&b, &b0);
            prop_assert_eq!(merge(Some(&a), None), Some(a.clone()));
            prop_assert_eq!(a.merge(&Outer::default()), a.clone());
            if a.x.is_some() {
                prop_assert_eq!(merged.x, a.x);
            } else {
                prop_assert_eq!(merged.x, b.x);
            }
        }

        #[test]
        fn test_jf004_associative(a in arb_outer(), b in arb_outer(), c in arb_outer()) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }
    }
}
