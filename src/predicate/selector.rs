//! Label and field selectors in the Kubernetes text syntax.
//!
//! ```text
//! labels:  env=prod,tier!=db,app in (web,api),release notin (canary),owner,!legacy
//! fields:  metadata.name=foo,metadata.namespace!=kube-system
//! ```

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use super::Predicate;
use crate::resource::accessor;
use crate::resource::ObjectMeta;
use crate::resource::Resource;
use crate::Result;
use crate::WatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRequirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: BTreeSet<String> },
    NotIn { key: String, values: BTreeSet<String> },
    Exists { key: String },
    DoesNotExist { key: String },
}

impl LabelRequirement {
    pub fn matches(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        match self {
            LabelRequirement::Equals { key, value } => labels.get(key) == Some(value),
            // absent labels satisfy the negative forms
            LabelRequirement::NotEquals { key, value } => labels.get(key) != Some(value),
            LabelRequirement::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            LabelRequirement::NotIn { key, values } => !labels.get(key).is_some_and(|v| values.contains(v)),
            LabelRequirement::Exists { key } => labels.contains_key(key),
            LabelRequirement::DoesNotExist { key } => !labels.contains_key(key),
        }
    }

    fn parse(term: &str) -> Result<Self> {
        if let Some(rest) = term.strip_prefix('!') {
            let key = validate_key(rest.trim())?;
            return Ok(LabelRequirement::DoesNotExist { key });
        }

        if let Some((key, value)) = term.split_once("!=") {
            return Ok(LabelRequirement::NotEquals {
                key: validate_key(key.trim())?,
                value: validate_value(value.trim())?,
            });
        }

        if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
            return Ok(LabelRequirement::Equals {
                key: validate_key(key.trim())?,
                value: validate_value(value.trim())?,
            });
        }

        let mut parts = term.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let Some(rest) = parts.next().map(str::trim_start) else {
            return Ok(LabelRequirement::Exists {
                key: validate_key(key)?,
            });
        };

        let key = validate_key(key)?;
        if let Some(set) = rest.strip_prefix("notin") {
            return Ok(LabelRequirement::NotIn {
                key,
                values: parse_value_set(set)?,
            });
        }
        if let Some(set) = rest.strip_prefix("in") {
            return Ok(LabelRequirement::In {
                key,
                values: parse_value_set(set)?,
            });
        }

        Err(invalid(format!("unknown operator in {term:?}")))
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            LabelRequirement::Equals { key, value } => write!(f, "{key}={value}"),
            LabelRequirement::NotEquals { key, value } => write!(f, "{key}!={value}"),
            LabelRequirement::In { key, values } => write!(f, "{key} in ({})", join(values)),
            LabelRequirement::NotIn { key, values } => write!(f, "{key} notin ({})", join(values)),
            LabelRequirement::Exists { key } => write!(f, "{key}"),
            LabelRequirement::DoesNotExist { key } => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of label requirements; empty selects everything
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> Result<Self> {
        let requirements = split_terms(selector)?
            .into_iter()
            .map(LabelRequirement::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { requirements })
    }

    pub fn from_requirements(requirements: Vec<LabelRequirement>) -> Self {
        Self { requirements }
    }

    pub fn requirements(&self) -> &[LabelRequirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        write!(f, "{}", terms.join(","))
    }
}

/// Fields a field selector may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectableField {
    Name,
    Namespace,
}

impl SelectableField {
    fn parse(field: &str) -> Result<Self> {
        match field {
            "metadata.name" => Ok(SelectableField::Name),
            "metadata.namespace" => Ok(SelectableField::Namespace),
            other => Err(invalid(format!("field {other:?} is not supported"))),
        }
    }

    fn value<'a>(
        &self,
        meta: &'a ObjectMeta,
    ) -> &'a str {
        match self {
            SelectableField::Name => &meta.name,
            SelectableField::Namespace => &meta.namespace,
        }
    }
}

impl fmt::Display for SelectableField {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SelectableField::Name => write!(f, "metadata.name"),
            SelectableField::Namespace => write!(f, "metadata.namespace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    pub field: SelectableField,
    pub value: String,
    pub negated: bool,
}

impl FieldRequirement {
    fn parse(term: &str) -> Result<Self> {
        let (field, value, negated) = if let Some((f, v)) = term.split_once("!=") {
            (f, v, true)
        } else if let Some((f, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
            (f, v, false)
        } else {
            return Err(invalid(format!("field requirement {term:?} has no operator")));
        };

        Ok(Self {
            field: SelectableField::parse(field.trim())?,
            value: value.trim().to_string(),
            negated,
        })
    }

    pub fn matches(
        &self,
        meta: &ObjectMeta,
    ) -> bool {
        (self.field.value(meta) == self.value) != self.negated
    }
}

/// Conjunction of field requirements; empty selects everything
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> Result<Self> {
        let requirements = split_terms(selector)?
            .into_iter()
            .map(FieldRequirement::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(
        &self,
        meta: &ObjectMeta,
    ) -> bool {
        self.requirements.iter().all(|r| r.matches(meta))
    }
}

/// Label and field selectors combined, evaluated against object metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionPredicate {
    pub label: LabelSelector,
    pub field: FieldSelector,
}

impl SelectionPredicate {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Self> {
        Ok(Self {
            label: LabelSelector::parse(label_selector)?,
            field: FieldSelector::parse(field_selector)?,
        })
    }

    pub fn is_everything(&self) -> bool {
        self.label.is_empty() && self.field.is_empty()
    }
}

impl<O: Resource> Predicate<O> for SelectionPredicate {
    fn matches(
        &self,
        obj: &O,
    ) -> Result<bool> {
        let meta = accessor(obj)?;
        Ok(self.label.matches(&meta.labels) && self.field.matches(meta))
    }
}

/// Splits on commas that are not inside a `( ... )` value set
fn split_terms(selector: &str) -> Result<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(format!("unbalanced ')' in {selector:?}")))?;
            }
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(format!("unbalanced '(' in {selector:?}")));
    }
    terms.push(&selector[start..]);

    let terms: Vec<&str> = terms.into_iter().map(str::trim).collect();
    if terms.len() == 1 && terms[0].is_empty() {
        return Ok(Vec::new());
    }
    if terms.iter().any(|t| t.is_empty()) {
        return Err(invalid(format!("empty requirement in {selector:?}")));
    }
    Ok(terms)
}

fn parse_value_set(set: &str) -> Result<BTreeSet<String>> {
    let inner = set
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| invalid(format!("value set {set:?} must be parenthesized")))?;

    let values = inner
        .split(',')
        .map(|v| validate_value(v.trim()))
        .collect::<Result<BTreeSet<_>>>()?;

    if values.iter().any(String::is_empty) {
        return Err(invalid(format!("value set {set:?} has an empty value")));
    }
    Ok(values)
}

fn validate_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(invalid("label key must not be empty".to_string()));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')) {
        return Err(invalid(format!("invalid label key {key:?}")));
    }
    Ok(key.to_string())
}

fn validate_value(value: &str) -> Result<String> {
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return Err(invalid(format!("invalid label value {value:?}")));
    }
    Ok(value.to_string())
}

fn invalid(msg: String) -> crate::Error {
    WatchError::InvalidSelector(msg).into()
}
