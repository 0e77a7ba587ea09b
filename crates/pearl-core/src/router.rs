//! Top-level routing: per-agent overrides, classification, rule selection, fallback chain.

use crate::{ChatMessage, RequestClassification};
use crate::classifier::{Classifier, KeywordOverride};
use crate::rule::{RoutingRule, RuleEngine};
use std::collections::HashMap;

/// Result of [`Router::route`].
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub model: String,
    pub classification: RequestClassification,
    pub rule_name: Option<String>,
    pub fallbacks: Vec<String>,
}

pub struct Router;

impl Router {
    /// 1. Per-agent override short-circuits everything else.
    /// 2. Otherwise classify, then select via the rule engine.
    pub fn route(
        messages: &[ChatMessage],
        agent_id: &str,
        agent_overrides: &HashMap<String, String>,
        rules: &[RoutingRule],
        keyword_overrides: &[KeywordOverride],
        fallback_model: &str,
    ) -> RouteResult {
        let classification = Classifier::classify(messages, keyword_overrides);

        if let Some(model) = agent_overrides.get(agent_id) {
            return RouteResult {
                model: model.clone(),
                classification,
                rule_name: None,
                fallbacks: vec![],
            };
        }

        let (model, rule) = RuleEngine::select(rules, &classification, fallback_model);
        let fallbacks = rule.map(|r| r.fallbacks.clone()).unwrap_or_default();
        let rule_name = rule.map(|r| r.name.clone());

        RouteResult {
            model,
            classification,
            rule_name,
            fallbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageContent;
    use crate::rule::{RuleMatch, TokenComparator, TokenMatch};

    fn user(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".into(),
            content: MessageContent::text(text),
        }
    }

    #[test]
    fn agent_override_bypasses_rules() {
        let mut overrides = HashMap::new();
        overrides.insert("nova".to_string(), "pinned/model".to_string());
        let result = Router::route(
            &[user("hello")],
            "nova",
            &overrides,
            &[],
            &[],
            "fallback/model",
        );
        assert_eq!(result.model, "pinned/model");
        assert!(result.rule_name.is_none());
    }

    #[test]
    fn simple_chat_routes_to_cheap_model() {
        let rules = vec![RoutingRule {
            name: "cheap".into(),
            r#match: RuleMatch {
                complexity: Some(crate::Complexity::Low),
                ..Default::default()
            },
            model: "local/small".into(),
            priority: 30,
            default: false,
            fallbacks: vec![],
        }];
        let result = Router::route(
            &[user("hello")],
            "agent-1",
            &HashMap::new(),
            &rules,
            &[],
            "fallback/model",
        );
        assert_eq!(result.model, "local/small");
        assert_eq!(result.classification.complexity, crate::Complexity::Low);
    }

    #[test]
    fn sensitive_content_routes_locally_regardless_of_other_signals() {
        let rules = vec![
            RoutingRule {
                name: "sensitive".into(),
                r#match: RuleMatch {
                    sensitive: Some(true),
                    ..Default::default()
                },
                model: "local/model".into(),
                priority: 200,
                default: false,
                fallbacks: vec![],
            },
            RoutingRule {
                name: "big".into(),
                r#match: RuleMatch {
                    estimated_tokens: Some(TokenMatch {
                        comparator: TokenComparator::Gte,
                        value: 1,
                    }),
                    ..Default::default()
                },
                model: "remote/big".into(),
                priority: 100,
                default: false,
                fallbacks: vec![],
            },
        ];
        let result = Router::route(
            &[user("my password: hunter2")],
            "agent-1",
            &HashMap::new(),
            &rules,
            &[],
            "fallback/model",
        );
        assert_eq!(result.model, "local/model");
    }
}
