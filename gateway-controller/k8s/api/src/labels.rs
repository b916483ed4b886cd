use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// A Kubernetes label selector.
///
/// An empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<Expression>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

// === impl Selector ===

impl Selector {
    pub fn matches(&self, labels: &Map) -> bool {
        let labels_match = self
            .match_labels
            .iter()
            .flatten()
            .all(|(k, v)| labels.get(k) == Some(v));
        labels_match
            && self
                .match_expressions
                .iter()
                .flatten()
                .all(|expr| expr.matches(labels))
    }
}

impl FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self {
            match_labels: Some(
                iter.into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            match_expressions: None,
        }
    }
}

// === impl Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.map_or(false, |v| self.values.contains(v)),
            Operator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn selector_matching() {
        let sel = Selector::from_iter([("env", "prod")]);
        assert!(sel.matches(&labels(&[("env", "prod"), ("team", "a")])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(Selector::default().matches(&labels(&[])));

        let sel = Selector {
            match_labels: None,
            match_expressions: Some(vec![
                Expression {
                    key: "team".into(),
                    operator: Operator::NotIn,
                    values: vec!["b".into()],
                },
                Expression {
                    key: "env".into(),
                    operator: Operator::Exists,
                    values: vec![],
                },
            ]),
        };
        assert!(sel.matches(&labels(&[("env", "x"), ("team", "a")])));
        assert!(!sel.matches(&labels(&[("env", "x"), ("team", "b")])));
        assert!(!sel.matches(&labels(&[("team", "a")])));
    }
}
