//! Label selector validation
//!
//! Accepts the Kubernetes label-selector string syntax used by list and
//! watch requests, e.g. `karpenter.sh/nodepool=default,!spot` or
//! `tier in (a,b)`.

use regex::Regex;
use std::sync::OnceLock;

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

static NAME_RE: OnceLock<Regex> = OnceLock::new();
static PREFIX_RE: OnceLock<Regex> = OnceLock::new();
static SET_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("name pattern is valid")
    })
}

fn prefix_re() -> &'static Regex {
    PREFIX_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("prefix pattern is valid")
    })
}

fn set_re() -> &'static Regex {
    SET_RE.get_or_init(|| {
        Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("set pattern is valid")
    })
}

/// Operator of a single selector requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Exists,
    DoesNotExist,
    Equals,
    NotEquals,
    In,
    NotIn,
}

/// One comma-separated clause of a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

/// Parse a label selector into its requirements
pub fn parse_selector(selector: &str) -> Result<Vec<Requirement>, String> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Ok(Vec::new());
    }

    split_top_level(selector)?
        .into_iter()
        .map(|clause| parse_requirement(clause.trim()))
        .collect()
}

/// Split on commas that are not inside a value set
fn split_top_level(selector: &str) -> Result<Vec<&str>, String> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            ',' if depth == 0 => {
                clauses.push(&selector[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    clauses.push(&selector[start..]);
    Ok(clauses)
}

fn parse_requirement(clause: &str) -> Result<Requirement, String> {
    if clause.is_empty() {
        return Err("empty requirement".to_string());
    }

    if let Some(key) = clause.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }

    if let Some(caps) = set_re().captures(clause) {
        let key = &caps[1];
        validate_key(key)?;
        let operator = if &caps[2] == "in" {
            Operator::In
        } else {
            Operator::NotIn
        };
        let values: Vec<String> = caps[3]
            .split(',')
            .map(|v| v.trim().to_string())
            .collect();
        if values.iter().all(|v| v.is_empty()) {
            return Err(format!("set for {key:?} can't be empty"));
        }
        for value in &values {
            validate_value(value)?;
        }
        return Ok(Requirement {
            key: key.to_string(),
            operator,
            values,
        });
    }

    let (key, operator, value) = if let Some((k, v)) = clause.split_once("!=") {
        (k, Operator::NotEquals, v)
    } else if let Some((k, v)) = clause.split_once("==") {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = clause.split_once('=') {
        (k, Operator::Equals, v)
    } else {
        validate_key(clause)?;
        return Ok(Requirement {
            key: clause.to_string(),
            operator: Operator::Exists,
            values: Vec::new(),
        });
    };

    let (key, value) = (key.trim(), value.trim());
    validate_key(key)?;
    validate_value(value)?;
    Ok(Requirement {
        key: key.to_string(),
        operator,
        values: vec![value.to_string()],
    })
}

fn validate_key(key: &str) -> Result<(), String> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !prefix_re().is_match(prefix)
            {
                return Err(format!("invalid key prefix {prefix:?}"));
            }
            name
        }
        None => key,
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name_re().is_match(name) {
        return Err(format!("invalid label key {key:?}"));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LEN || !name_re().is_match(value) {
        return Err(format!("invalid label value {value:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_everything() {
        assert!(parse_selector("").unwrap().is_empty());
        assert!(parse_selector("   ").unwrap().is_empty());
    }

    #[test]
    fn equality_and_existence() {
        let reqs = parse_selector("karpenter.sh/nodepool=default, !spot, tier!=web, zone").unwrap();
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[0].key, "karpenter.sh/nodepool");
        assert_eq!(reqs[0].operator, Operator::Equals);
        assert_eq!(reqs[0].values, vec!["default".to_string()]);
        assert_eq!(reqs[1].operator, Operator::DoesNotExist);
        assert_eq!(reqs[2].operator, Operator::NotEquals);
        assert_eq!(reqs[3].operator, Operator::Exists);
    }

    #[test]
    fn double_equals_is_equality() {
        let reqs = parse_selector("app==web").unwrap();
        assert_eq!(reqs[0].operator, Operator::Equals);
        assert_eq!(reqs[0].values, vec!["web".to_string()]);
    }

    #[test]
    fn set_based_requirements() {
        let reqs = parse_selector("tier in (a, b),env notin (prod)").unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].operator, Operator::In);
        assert_eq!(reqs[0].values, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(reqs[1].operator, Operator::NotIn);
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in [
            "a=b=c",
            "tier in (a,b",
            "tier in ()",
            "=value",
            "app=,",
            "-bad",
            "Upper.Case/name=x",
            "key=val ue",
        ] {
            assert!(parse_selector(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "a".repeat(64);
        assert!(parse_selector(&long).is_err());
        assert!(parse_selector(&format!("k={long}")).is_err());
    }
}
