//! Priority rule engine: selects a backend model from a [`RequestClassification`].

use crate::{Complexity, RequestClassification, RequestType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenComparator {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
}

impl TokenComparator {
    fn matches(&self, actual: u32, threshold: u32) -> bool {
        match self {
            TokenComparator::Lt => actual < threshold,
            TokenComparator::Gt => actual > threshold,
            TokenComparator::Lte => actual <= threshold,
            TokenComparator::Gte => actual >= threshold,
            TokenComparator::Eq => actual == threshold,
        }
    }
}

/// A token-count predicate: `{comparator, value}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMatch {
    pub comparator: TokenComparator,
    pub value: u32,
}

/// The set of predicates a rule checks; every specified field must hold (AND), and an
/// unspecified field means "don't care".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub request_type: Option<RequestType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_tools: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<TokenMatch>,
}

impl RuleMatch {
    fn is_satisfied_by(&self, c: &RequestClassification) -> bool {
        if let Some(expected) = self.complexity {
            if expected != c.complexity {
                return false;
            }
        }
        if let Some(expected) = self.request_type {
            if expected != c.request_type {
                return false;
            }
        }
        if let Some(expected) = self.sensitive {
            if expected != c.sensitive {
                return false;
            }
        }
        if let Some(expected) = self.requires_tools {
            if expected != c.requires_tools {
                return false;
            }
        }
        if let Some(tm) = &self.estimated_tokens {
            if !tm.comparator.matches(c.estimated_tokens, tm.value) {
                return false;
            }
        }
        true
    }
}

/// One entry in the routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    #[serde(default)]
    pub r#match: RuleMatch,
    pub model: String,
    pub priority: i32,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// Pure function: rules in, model out. Holds no state — callers keep rules sorted
/// (or call [`RuleEngine::select`], which sorts defensively every time).
pub struct RuleEngine;

impl RuleEngine {
    /// Selects the model for `classification` against `rules`. Rules are evaluated in
    /// descending priority order; the first whose predicates all hold wins. If none
    /// match, the rule with `default: true` (if any) is used. If neither exists,
    /// `fallback_model` is returned with no matched rule name.
    pub fn select<'a>(
        rules: &'a [RoutingRule],
        classification: &RequestClassification,
        fallback_model: &str,
    ) -> (String, Option<&'a RoutingRule>) {
        let mut ordered: Vec<&RoutingRule> = rules.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in &ordered {
            if !rule.default && rule.r#match.is_satisfied_by(classification) {
                return (rule.model.clone(), Some(rule));
            }
        }

        if let Some(default_rule) = ordered.iter().find(|r| r.default) {
            return (default_rule.model.clone(), Some(default_rule));
        }

        (fallback_model.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DimensionScores;

    fn classification(complexity: Complexity, sensitive: bool, tokens: u32) -> RequestClassification {
        RequestClassification {
            complexity,
            request_type: RequestType::General,
            sensitive,
            estimated_tokens: tokens,
            requires_tools: false,
            weighted_score: 0.0,
            dimension_scores: DimensionScores::default(),
            confidence: 1.0,
        }
    }

    #[test]
    fn first_matching_rule_by_priority_wins() {
        let rules = vec![
            RoutingRule {
                name: "sensitive".into(),
                r#match: RuleMatch {
                    sensitive: Some(true),
                    ..Default::default()
                },
                model: "local/model".into(),
                priority: 100,
                default: false,
                fallbacks: vec![],
            },
            RoutingRule {
                name: "cheap".into(),
                r#match: RuleMatch {
                    complexity: Some(Complexity::Low),
                    ..Default::default()
                },
                model: "local/small".into(),
                priority: 30,
                default: false,
                fallbacks: vec![],
            },
        ];
        let c = classification(Complexity::Low, true, 2);
        let (model, rule) = RuleEngine::select(&rules, &c, "fallback/model");
        assert_eq!(model, "local/model");
        assert_eq!(rule.unwrap().name, "sensitive");
    }

    #[test]
    fn default_rule_used_when_nothing_matches() {
        let rules = vec![
            RoutingRule {
                name: "fallback".into(),
                r#match: RuleMatch::default(),
                model: "default/model".into(),
                priority: i32::MIN,
                default: true,
                fallbacks: vec![],
            },
            RoutingRule {
                name: "code".into(),
                r#match: RuleMatch {
                    request_type: Some(RequestType::Code),
                    ..Default::default()
                },
                model: "code/model".into(),
                priority: 50,
                default: false,
                fallbacks: vec![],
            },
        ];
        let c = classification(Complexity::Medium, false, 10);
        let (model, rule) = RuleEngine::select(&rules, &c, "fallback/model");
        assert_eq!(model, "default/model");
        assert!(rule.unwrap().default);
    }

    #[test]
    fn no_rules_returns_configured_fallback() {
        let c = classification(Complexity::Low, false, 1);
        let (model, rule) = RuleEngine::select(&[], &c, "fallback/model");
        assert_eq!(model, "fallback/model");
        assert!(rule.is_none());
    }

    #[test]
    fn token_comparator_boundary_exact_match() {
        let rules = vec![RoutingRule {
            name: "big".into(),
            r#match: RuleMatch {
                estimated_tokens: Some(TokenMatch {
                    comparator: TokenComparator::Gte,
                    value: 500,
                }),
                ..Default::default()
            },
            model: "big/model".into(),
            priority: 10,
            default: false,
            fallbacks: vec![],
        }];
        let c = classification(Complexity::Medium, false, 500);
        let (model, _) = RuleEngine::select(&rules, &c, "fallback/model");
        assert_eq!(model, "big/model");
    }

    #[test]
    fn deterministic_for_equal_classifications() {
        let rules = vec![RoutingRule {
            name: "r".into(),
            r#match: RuleMatch::default(),
            model: "m".into(),
            priority: 1,
            default: false,
            fallbacks: vec![],
        }];
        let c = classification(Complexity::Low, false, 1);
        let (a, _) = RuleEngine::select(&rules, &c, "fb");
        let (b, _) = RuleEngine::select(&rules, &c, "fb");
        assert_eq!(a, b);
    }
}
