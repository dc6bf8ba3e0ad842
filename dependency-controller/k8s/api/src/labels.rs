use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, LazyLock},
};
use thiserror::Error;

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of objects by their labels.
///
/// Selectors are only constructed by parsing a `metav1.LabelSelector`, so a
/// `Selector` value is always well-formed.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Expressions,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid value {value:?} for label {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("unknown operator {operator:?} for label {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator:?} for label {key:?} requires at least one value")]
    MissingValues { key: String, operator: &'static str },

    #[error("operator {operator:?} for label {key:?} must not have values")]
    UnexpectedValues { key: String, operator: &'static str },
}

const NAME_MAX_LEN: usize = 63;
const PREFIX_MAX_LEN: usize = 253;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("label name regex must compile")
});

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("label prefix regex must compile")
});

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: Map::default(),
            match_expressions: exprs,
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Expressions::default(),
        }
    }

    /// Returns true if the selector has no requirements and therefore selects
    /// every object.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        for (k, v) in self.match_labels.iter() {
            if labels.0.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = ParseError;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let mut match_labels = Map::default();
        for (key, value) in selector.match_labels.iter().flatten() {
            validate_key(key)?;
            validate_value(key, value)?;
            match_labels.insert(key.clone(), value.clone());
        }

        let match_expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(Expression::try_from)
            .collect::<Result<Expressions, _>>()?;

        Ok(Self {
            match_labels,
            match_expressions,
        })
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl TryFrom<&LabelSelectorRequirement> for Expression {
    type Error = ParseError;

    fn try_from(req: &LabelSelectorRequirement) -> Result<Self, Self::Error> {
        validate_key(&req.key)?;

        let operator = match req.operator.as_str() {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            operator => {
                return Err(ParseError::UnknownOperator {
                    key: req.key.clone(),
                    operator: operator.to_string(),
                })
            }
        };

        let values = req.values.clone().unwrap_or_default();
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(ParseError::MissingValues {
                    key: req.key.clone(),
                    operator: operator.as_str(),
                });
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(ParseError::UnexpectedValues {
                    key: req.key.clone(),
                    operator: operator.as_str(),
                });
            }
            _ => {}
        }

        for value in &values {
            validate_value(&req.key, value)?;
        }

        Ok(Self {
            key: req.key.clone(),
            operator,
            values: values.into_iter().collect(),
        })
    }
}

impl Operator {
    fn as_str(&self) -> &'static str {
        match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        }
    }
}

fn validate_key(key: &str) -> Result<(), ParseError> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > PREFIX_MAX_LEN || !PREFIX_RE.is_match(prefix) {
            return Err(ParseError::InvalidKey(key.to_string()));
        }
    }

    if name.len() > NAME_MAX_LEN || !NAME_RE.is_match(name) {
        return Err(ParseError::InvalidKey(key.to_string()));
    }

    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Ok(());
    }

    if value.len() > NAME_MAX_LEN || !NAME_RE.is_match(value) {
        return Err(ParseError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use std::iter::FromIterator;

    fn requirement(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "label value mismatch",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::In, ["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::In, ["bar"]))),
                Labels::default(),
                false,
                "in requires the key",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "not-in excludes listed values",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::default(),
                true,
                "not-in matches a missing key",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::Exists,
                    Vec::<String>::new(),
                ))),
                Labels::from_iter(Some(("foo", ""))),
                true,
                "exists",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::DoesNotExist,
                    Vec::<String>::new(),
                ))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "does not exist",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn parses_label_selector() {
        let selector = Selector::try_from(&LabelSelector {
            match_labels: Some(btreemap! { "app".to_string() => "web".to_string() }),
            match_expressions: Some(vec![
                requirement("tier", "In", &["frontend", "edge"]),
                requirement("example.com/canary", "DoesNotExist", &[]),
            ]),
        })
        .expect("selector must parse");

        assert!(selector.matches(&Labels::from_iter(vec![("app", "web"), ("tier", "edge")])));
        assert!(!selector.matches(&Labels::from_iter(vec![
            ("app", "web"),
            ("tier", "edge"),
            ("example.com/canary", "true"),
        ])));
        assert!(!selector.matches(&Labels::from_iter(Some(("app", "web")))));
    }

    #[test]
    fn empty_label_selector_selects_everything() {
        let selector = Selector::try_from(&LabelSelector::default()).unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&Labels::from_iter(Some(("any", "thing")))));
    }

    #[test]
    fn rejects_malformed_selectors() {
        let cases = [
            (
                requirement("app", "Equals", &["web"]),
                ParseError::UnknownOperator {
                    key: "app".into(),
                    operator: "Equals".into(),
                },
            ),
            (
                requirement("app", "In", &[]),
                ParseError::MissingValues {
                    key: "app".into(),
                    operator: "In",
                },
            ),
            (
                requirement("app", "Exists", &["web"]),
                ParseError::UnexpectedValues {
                    key: "app".into(),
                    operator: "Exists",
                },
            ),
            (
                requirement("-app", "Exists", &[]),
                ParseError::InvalidKey("-app".into()),
            ),
            (
                requirement("app", "In", &["no spaces"]),
                ParseError::InvalidValue {
                    key: "app".into(),
                    value: "no spaces".into(),
                },
            ),
        ];

        for (req, expected) in cases {
            let selector = LabelSelector {
                match_expressions: Some(vec![req]),
                ..Default::default()
            };
            assert_eq!(Selector::try_from(&selector), Err(expected));
        }

        let selector = LabelSelector {
            match_labels: Some(btreemap! { "Bad_Prefix/app".to_string() => "web".to_string() }),
            ..Default::default()
        };
        assert_eq!(
            Selector::try_from(&selector),
            Err(ParseError::InvalidKey("Bad_Prefix/app".into()))
        );
    }
}
