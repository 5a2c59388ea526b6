//! Kubernetes label and field selector parsing and matching

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static LABEL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$",
    )
    .expect("label key regex is valid")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").expect("label value regex is valid")
});

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid label value {0:?}")]
    InvalidValue(String),

    #[error("unbalanced parentheses in selector {0:?}")]
    Unbalanced(String),

    #[error("unsupported field selector requirement {0:?}")]
    UnsupportedField(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => labels.get(k).is_none_or(|v| !values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// A parsed label selector in the string form accepted by the API server
/// (`a=b,c!=d,e in (f,g),!h`). The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for term in split_top_level(selector)? {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(term)?);
        }
        Ok(Self { requirements })
    }

    /// Selector requiring every `key=value` pair of `labels`
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for (k, v) in labels {
            requirements.push(Requirement::Equals(validate_key(k)?, validate_value(v)?));
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let terms: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::NotEquals(k, v) => format!("{}!={}", k, v),
                Requirement::In(k, vs) => format!("{} in ({})", k, vs.join(",")),
                Requirement::NotIn(k, vs) => format!("{} notin ({})", k, vs.join(",")),
                Requirement::Exists(k) => k.clone(),
                Requirement::DoesNotExist(k) => format!("!{}", k),
            })
            .collect();
        write!(f, "{}", terms.join(","))
    }
}

/// A field selector. Only `metadata.name` and `metadata.namespace` can be
/// evaluated locally; other fields are left to the API server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelector {
    requirements: Vec<(String, String, bool)>,
}

impl FieldSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (field, value, equal) = if let Some((f, v)) = term.split_once("!=") {
                (f, v, false)
            } else if let Some((f, v)) = term.split_once("==") {
                (f, v, true)
            } else if let Some((f, v)) = term.split_once('=') {
                (f, v, true)
            } else {
                return Err(SelectorError::UnsupportedField(term.to_string()));
            };
            requirements.push((field.trim().to_string(), value.trim().to_string(), equal));
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, namespace: &str, name: &str) -> bool {
        self.requirements.iter().all(|(field, value, equal)| {
            let actual = match field.as_str() {
                "metadata.name" => name,
                "metadata.namespace" => namespace,
                _ => return true,
            };
            (actual == value) == *equal
        })
    }
}

fn split_top_level(selector: &str) -> Result<Vec<&str>, SelectorError> {
    let mut terms = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(SelectorError::Unbalanced(selector.to_string()));
                }
            }
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Unbalanced(selector.to_string()));
    }
    terms.push(&selector[start..]);
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement, SelectorError> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(validate_key(key.trim())?));
    }
    if let Some((key, values)) = term.split_once(" notin ") {
        return Ok(Requirement::NotIn(validate_key(key.trim())?, parse_set(values)?));
    }
    if let Some((key, values)) = term.split_once(" in ") {
        return Ok(Requirement::In(validate_key(key.trim())?, parse_set(values)?));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }
    Ok(Requirement::Exists(validate_key(term)?))
}

fn parse_set(values: &str) -> Result<Vec<String>, SelectorError> {
    let inner = values
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| SelectorError::Unbalanced(values.to_string()))?;
    inner
        .split(',')
        .map(|v| validate_value(v.trim()))
        .collect()
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    if key.len() > 316 || !LABEL_KEY.is_match(key) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(key.to_string())
}

fn validate_value(value: &str) -> Result<String, SelectorError> {
    if value.len() > 63 || !LABEL_VALUE.is_match(value) {
        return Err(SelectorError::InvalidValue(value.to_string()));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::parse("").unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("app", "dns")])));
    }

    #[test]
    fn test_equality_requirements() {
        let selector =
            LabelSelector::parse("app.kubernetes.io/managed-by=kops,addon.kops.k8s.io/name==dns").unwrap();
        assert!(selector.matches(&labels(&[
            ("app.kubernetes.io/managed-by", "kops"),
            ("addon.kops.k8s.io/name", "dns"),
            ("extra", "x"),
        ])));
        assert!(!selector.matches(&labels(&[("app.kubernetes.io/managed-by", "kops")])));
    }

    #[test]
    fn test_set_and_existence_requirements() {
        let selector = LabelSelector::parse("tier in (a, b),env notin (prod),owner,!legacy").unwrap();
        assert!(selector.matches(&labels(&[("tier", "a"), ("owner", "me")])));
        assert!(!selector.matches(&labels(&[("tier", "c"), ("owner", "me")])));
        assert!(!selector.matches(&labels(&[("tier", "a"), ("owner", "me"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("tier", "a"), ("owner", "me"), ("legacy", "")])));
        assert!(!selector.matches(&labels(&[("tier", "a")])));
    }

    #[test]
    fn test_not_equals() {
        let selector = LabelSelector::parse("app!=web").unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("app", "web")])));
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(LabelSelector::parse("bad key=x").is_err());
        assert!(LabelSelector::parse("tier in (a,b").is_err());
        assert!(LabelSelector::parse("a=b c").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let selector = LabelSelector::from_labels([("a", "b"), ("c", "d")]).unwrap();
        assert_eq!(selector.to_string(), "a=b,c=d");
        assert_eq!(LabelSelector::parse(&selector.to_string()).unwrap(), selector);
    }

    #[test]
    fn test_field_selector() {
        let selector = FieldSelector::parse("metadata.name!=keep,metadata.namespace=default").unwrap();
        assert!(selector.matches("default", "other"));
        assert!(!selector.matches("default", "keep"));
        assert!(!selector.matches("kube-system", "other"));

        let server_side = FieldSelector::parse("status.phase=Running").unwrap();
        assert!(server_side.matches("any", "thing"));
        assert!(FieldSelector::parse("metadata.name").is_err());
    }
}
