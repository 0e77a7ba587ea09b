//! Integration tests exercising pearl-core across module boundaries:
//! classify → route, config load → deep-merge → env expansion, and the
//! end-to-end scenarios from the gateway scenario catalog that need no I/O.

use std::collections::HashMap;

use pearl_core::rule::{RuleMatch, TokenComparator, TokenMatch};
use pearl_core::{ChatMessage, Complexity, GatewayConfig, MessageContent, RequestType, RouteResult, Router, RoutingRule};

fn user(text: &str) -> ChatMessage {
    ChatMessage {
        role: "user".into(),
        content: MessageContent::text(text),
    }
}

fn route(messages: &[ChatMessage], rules: &[RoutingRule]) -> RouteResult {
    Router::route(messages, "agent-1", &HashMap::new(), rules, &[], "auto/fallback")
}

/// Scenario 1: simple chat routes to the cheap model.
#[test]
fn simple_chat_routes_to_cheap_model() {
    let rules = vec![RoutingRule {
        name: "cheap".into(),
        r#match: RuleMatch {
            complexity: Some(Complexity::Low),
            ..Default::default()
        },
        model: "local/small".into(),
        priority: 30,
        default: false,
        fallbacks: vec![],
    }];
    let result = route(&[user("hello")], &rules);
    assert_eq!(result.model, "local/small");
    assert_eq!(result.classification.complexity, Complexity::Low);
    assert_eq!(result.classification.request_type, RequestType::Chat);
    assert!(!result.classification.sensitive);
    assert!(result.classification.estimated_tokens <= 3);
}

/// Scenario 2: sensitive content routes locally regardless of other rules' priority
/// ordering relative to token-count rules.
#[test]
fn sensitive_content_routes_locally() {
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
            name: "big".into(),
            r#match: RuleMatch {
                estimated_tokens: Some(TokenMatch {
                    comparator: TokenComparator::Gte,
                    value: 1,
                }),
                ..Default::default()
            },
            model: "remote/big".into(),
            priority: 200,
            default: false,
            fallbacks: vec!["remote/fallback".into()],
        },
    ];
    let result = route(&[user("my password: hunter2")], &rules);
    assert_eq!(result.model, "local/model");
}

/// Fallback chain surfaces on the matched rule even when another higher-priority
/// rule would have matched a different, unrelated predicate.
#[test]
fn fallback_chain_carried_from_matched_rule() {
    let rules = vec![RoutingRule {
        name: "code".into(),
        r#match: RuleMatch {
            request_type: Some(RequestType::Code),
            ..Default::default()
        },
        model: "remote/big".into(),
        priority: 50,
        default: false,
        fallbacks: vec!["remote/mid".into(), "local/small".into()],
    }];
    let result = route(&[user("fix this ```fn main() {}```")], &rules);
    assert_eq!(result.model, "remote/big");
    assert_eq!(result.fallbacks, vec!["remote/mid", "local/small"]);
}

/// Agent override bypasses the rule engine entirely, including for sensitive content.
#[test]
fn agent_override_bypasses_classification_based_routing() {
    let mut overrides = HashMap::new();
    overrides.insert("nova".to_string(), "pinned/model".to_string());
    let rules = vec![RoutingRule {
        name: "sensitive".into(),
        r#match: RuleMatch {
            sensitive: Some(true),
            ..Default::default()
        },
        model: "local/model".into(),
        priority: 100,
        default: false,
        fallbacks: vec![],
    }];
    let result = Router::route(
        &[user("my password: hunter2")],
        "nova",
        &overrides,
        &rules,
        &[],
        "auto/fallback",
    );
    assert_eq!(result.model, "pinned/model");
    assert!(result.rule_name.is_none());
}

/// Config: a YAML blob with `${VAR}` expansion deep-merged over defaults, loaded the
/// way the server's startup path does it.
#[test]
fn config_load_expands_env_then_merges_over_defaults() {
    unsafe {
        std::env::set_var("PEARL_TEST_BIND_PORT", "9999");
    }
    let raw = "server:\n  bind_addr: '0.0.0.0:${PEARL_TEST_BIND_PORT}'\n";
    let expanded = pearl_core::expand_env_vars(raw).unwrap();
    let config = GatewayConfig::load_from_yaml(&expanded).unwrap();
    assert_eq!(config.server.bind_addr, "0.0.0.0:9999");
    // Untouched sections still carry their built-in defaults.
    assert_eq!(config.memory.embedding_dimensions, 384);
    assert!(config.sunrise.enabled);
}

/// Classifier purity holds across the router boundary too: routing the same
/// messages twice with the same rules produces the same model and rule name.
#[test]
fn routing_is_deterministic() {
    let rules = vec![RoutingRule {
        name: "only".into(),
        r#match: RuleMatch::default(),
        model: "m".into(),
        priority: 1,
        default: false,
        fallbacks: vec![],
    }];
    let messages = [user("why does this algorithm fail, step by step?")];
    let a = route(&messages, &rules);
    let b = route(&messages, &rules);
    assert_eq!(a.model, b.model);
    assert_eq!(a.rule_name, b.rule_name);
    assert_eq!(a.classification, b.classification);
}
