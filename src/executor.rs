//! Executes a single rule against a collated context: injects the visitor's
//! allocation bucket, evaluates the condition tree, and on a match builds
//! the consequence with response tokens and macro substitution applied.

use crate::allocation::calculate_allocation;
use crate::artifact::{Consequence, Rule};
use crate::collators::geo::default_geo_params;
use crate::collators::CONTEXT_KEY_GEO;
use crate::condition::Expr;
use crate::delivery::RequestDetails;
use crate::errors::{DecisioningError, SharedReporter};
use crate::macros::MacroReplacer;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

const ALLOCATION: &str = "allocation";
const CAMPAIGN_BUCKET_SALT: &str = "0";
const RESPONSE_TOKEN_EXECUTION_TYPE: &str = "activity.decisioningMethod";
const EXECUTION_TYPE_LOCAL: &str = "on-device";

/// Per-detail record of which campaigns were considered, emitted into the
/// response when the request asks for a trace.
#[derive(Debug, Default)]
pub struct TraceAccumulator {
    pub campaigns: Vec<Value>,
}

pub struct RuleExecutor {
    client: String,
    reporter: SharedReporter,
}

impl RuleExecutor {
    pub fn new(client: String, reporter: SharedReporter) -> Self {
        RuleExecutor { client, reporter }
    }

    /// Evaluate one rule. A condition that fails to parse or evaluate is
    /// reported and treated as a non-match; it never fails the request.
    pub fn execute_rule(
        &self,
        context: &mut Map<String, Value>,
        details: &RequestDetails<'_>,
        visitor_id: &str,
        rule: &Rule,
        response_token_keys: &HashSet<String>,
        trace: Option<&mut TraceAccumulator>,
    ) -> Option<Consequence> {
        let activity_id = rule
            .meta
            .token_as_string("activity.id")
            .unwrap_or_default();
        let allocation =
            calculate_allocation(&self.client, &activity_id, visitor_id, CAMPAIGN_BUCKET_SALT);
        context.insert(ALLOCATION.to_string(), Value::from(allocation));
        log::trace!("rule activity={activity_id} allocation={allocation} context={context:?}");

        let matched = match Expr::parse(&rule.condition) {
            Ok(expr) => expr.matches(context),
            Err(e) => {
                self.reporter
                    .report(&DecisioningError::RuleEvaluation(e.to_string()));
                false
            }
        };

        if let Some(trace) = trace {
            trace.campaigns.push(json!({
                "activityId": rule.meta.tokens.get("activity.id").cloned().unwrap_or(Value::Null),
                "allocation": allocation,
                "matched": matched,
            }));
        }

        if !matched {
            return None;
        }

        let mut consequence = rule.consequence.clone();
        self.attach_response_tokens(&mut consequence, rule, context, response_token_keys);
        MacroReplacer::new(&rule.meta, details).apply(&mut consequence.options);
        Some(consequence)
    }

    /// Response tokens go on the first option only. Geo facts are included
    /// under `geo.*` keys (the `region` fact is published as `geo.state`)
    /// when the artifact declares them and they differ from the defaults.
    fn attach_response_tokens(
        &self,
        consequence: &mut Consequence,
        rule: &Rule,
        context: &Map<String, Value>,
        response_token_keys: &HashSet<String>,
    ) {
        if response_token_keys.is_empty() {
            return;
        }
        let Some(option) = consequence.options.first_mut() else {
            return;
        };

        option.response_tokens.insert(
            RESPONSE_TOKEN_EXECUTION_TYPE.to_string(),
            Value::from(EXECUTION_TYPE_LOCAL),
        );

        if let Some(Value::Object(geo)) = context.get(CONTEXT_KEY_GEO) {
            let defaults = default_geo_params();
            for (key, value) in geo {
                let token_key = if key == "region" {
                    format!("{CONTEXT_KEY_GEO}.state")
                } else {
                    format!("{CONTEXT_KEY_GEO}.{key}")
                };
                if response_token_keys.contains(&token_key)
                    && defaults.get(key) != Some(value)
                {
                    option.response_tokens.insert(token_key, value.clone());
                }
            }
        }

        for (key, value) in &rule.meta.tokens {
            if response_token_keys.contains(key) {
                option
                    .response_tokens
                    .insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::RuleArtifact;
    use crate::delivery::MboxRequest;
    use crate::errors::LogReporter;
    use std::sync::Arc;

    const ARTIFACT: &str = r#"{
        "version": "1.0.0",
        "globalMbox": "overall-mbox",
        "responseTokens": ["activity.id", "geo.state", "activity.decisioningMethod"],
        "localMboxes": ["promo"],
        "rules": [
            {
                "condition": {"<=": [0, {"var": "allocation"}, 100]},
                "consequence": {
                    "name": "promo",
                    "options": [{
                        "type": "html",
                        "content": "<p>activity ${activity.id} for ${mbox.name}</p>",
                        "eventToken": "tok-1"
                    }]
                },
                "meta": {
                    "ruleKey": "r1",
                    "mboxNames": ["promo"],
                    "activity.id": 125874,
                    "activity.name": "promo ab"
                }
            },
            {
                "condition": {"bogus_op": []},
                "consequence": {"options": [{"type": "json", "content": {"x": 1}}]},
                "meta": {"mboxNames": ["promo"], "activity.id": 1}
            }
        ]
    }"#;

    fn executor() -> RuleExecutor {
        RuleExecutor::new("client123".to_string(), Arc::new(LogReporter))
    }

    fn promo_mbox() -> MboxRequest {
        MboxRequest {
            name: "promo".to_string(),
            index: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_match_populates_tokens_and_macros() {
        let artifact: RuleArtifact = serde_json::from_str(ARTIFACT).unwrap();
        let mbox = promo_mbox();
        let details = RequestDetails::Mbox(&mbox);
        let mut context = Map::new();

        let consequence = executor()
            .execute_rule(
                &mut context,
                &details,
                "visitor-abc",
                &artifact.rules[0],
                &artifact.response_tokens,
                None,
            )
            .expect("rule should match at any allocation");

        let option = &consequence.options[0];
        assert_eq!(
            option.content.as_ref().unwrap().as_str().unwrap(),
            "<p>activity 125874 for promo</p>"
        );
        assert_eq!(option.response_tokens["activity.id"], 125874);
        assert_eq!(option.response_tokens["activity.decisioningMethod"], "on-device");
        assert!(context.contains_key("allocation"));
    }

    #[test]
    fn test_broken_condition_is_a_non_match() {
        let artifact: RuleArtifact = serde_json::from_str(ARTIFACT).unwrap();
        let mbox = promo_mbox();
        let details = RequestDetails::Mbox(&mbox);
        let mut context = Map::new();

        let result = executor().execute_rule(
            &mut context,
            &details,
            "visitor-abc",
            &artifact.rules[1],
            &artifact.response_tokens,
            None,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_geo_tokens_only_when_present() {
        let artifact: RuleArtifact = serde_json::from_str(ARTIFACT).unwrap();
        let mbox = promo_mbox();
        let details = RequestDetails::Mbox(&mbox);

        let mut context = Map::new();
        context.insert(
            CONTEXT_KEY_GEO.to_string(),
            serde_json::json!({"region": "CA", "city": ""}),
        );

        let consequence = executor()
            .execute_rule(
                &mut context,
                &details,
                "visitor-abc",
                &artifact.rules[0],
                &artifact.response_tokens,
                None,
            )
            .unwrap();
        let tokens = &consequence.options[0].response_tokens;
        assert_eq!(tokens["geo.state"], "CA");
        // Default-valued facts and undeclared keys stay out.
        assert!(!tokens.contains_key("geo.city"));
    }

    #[test]
    fn test_trace_records_each_campaign() {
        let artifact: RuleArtifact = serde_json::from_str(ARTIFACT).unwrap();
        let mbox = promo_mbox();
        let details = RequestDetails::Mbox(&mbox);
        let mut context = Map::new();
        let mut trace = TraceAccumulator::default();

        executor().execute_rule(
            &mut context,
            &details,
            "visitor-abc",
            &artifact.rules[0],
            &artifact.response_tokens,
            Some(&mut trace),
        );
        assert_eq!(trace.campaigns.len(), 1);
        assert_eq!(trace.campaigns[0]["matched"], true);
    }
}
