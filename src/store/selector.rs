//! # Label Selectors
//!
//! Equality- and existence-based label selectors in the API server's string
//! syntax: `a=b`, `a==b`, `a!=b`, `a`, `!a`, comma separated.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

/// Parsed label selector; the empty selector matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    #[must_use]
    pub fn parse(selector: &str) -> Self {
        let requirements = selector
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                if let Some((key, value)) = term.split_once("!=") {
                    Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
                } else if let Some((key, value)) = term.split_once("==") {
                    Requirement::Equals(key.trim().to_string(), value.trim().to_string())
                } else if let Some((key, value)) = term.split_once('=') {
                    Requirement::Equals(key.trim().to_string(), value.trim().to_string())
                } else if let Some(key) = term.strip_prefix('!') {
                    Requirement::NotExists(key.trim().to_string())
                } else {
                    Requirement::Exists(term.to_string())
                }
            })
            .collect();
        Self { requirements }
    }

    #[must_use]
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let get = |key: &str| labels.and_then(|l| l.get(key));
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => get(k) == Some(v),
            Requirement::NotEquals(k, v) => get(k) != Some(v),
            Requirement::Exists(k) => get(k).is_some(),
            Requirement::NotExists(k) => get(k).is_none(),
        })
    }
}
