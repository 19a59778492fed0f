//! The compiled rule artifact: the versioned document the loader downloads
//! and the whole engine evaluates against. Parsed once, then shared
//! immutably behind an `Arc` — an in-flight evaluation keeps the snapshot it
//! captured even if the loader swaps in a newer one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleArtifact {
    pub version: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    pub global_mbox: String,
    pub geo_targeting_enabled: bool,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub response_tokens: HashSet<String>,
    /// Mboxes with at least one on-device activity.
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub local_mboxes: HashSet<String>,
    /// Mboxes with at least one remote-only activity. A name in both sets is
    /// ambiguous and always routed remote.
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub remote_mboxes: HashSet<String>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub local_views: HashSet<String>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub remote_views: HashSet<String>,
    pub rules: Vec<Rule>,
}

impl RuleArtifact {
    /// Rules applicable to a named mbox, in artifact order.
    pub fn rules_for_mbox<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rule> {
        self.rules
            .iter()
            .filter(move |rule| rule.meta.mbox_names.contains(name))
    }

    /// Rules applicable to a view. `None` means the wildcard "all views"
    /// request, which selects every view-tagged rule.
    pub fn rules_for_view<'a>(&'a self, name: Option<&'a str>) -> impl Iterator<Item = &'a Rule> {
        self.rules.iter().filter(move |rule| match name {
            Some(name) => rule.meta.view_names.contains(name),
            None => !rule.meta.view_names.is_empty(),
        })
    }

    pub fn generated_at(&self) -> Option<&str> {
        self.meta.get("generatedAt").and_then(Value::as_str)
    }
}

/// Parse the major component out of a semver-like version string.
pub fn major_version(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    /// Serialized boolean-logic expression tree; parsed lazily at
    /// evaluation time so one malformed rule cannot poison the artifact.
    pub condition: Value,
    pub consequence: Consequence,
    pub meta: RuleMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleMeta {
    /// Cross-rule de-duplication key within one activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<String>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub mbox_names: HashSet<String>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub view_names: HashSet<String>,
    /// Absent or empty means the rule applies regardless of property.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_tokens: Option<HashSet<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub audience_ids: Vec<i64>,
    /// Dotted token entries (activity.id, activity.name, experience.id,
    /// offer.id, ...). Source for both response tokens and macro values.
    #[serde(flatten)]
    pub tokens: Map<String, Value>,
}

impl RuleMeta {
    pub fn activity_id(&self) -> Option<i64> {
        self.tokens.get("activity.id").and_then(Value::as_i64)
    }

    pub fn token_as_string(&self, key: &str) -> Option<String> {
        self.tokens.get(key).map(value_to_string)
    }
}

/// Stringify a scalar the way templates and response tokens want it: bare
/// strings without JSON quoting, everything else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Consequence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<DecisionOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Html,
    Json,
    Redirect,
    Actions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOption {
    #[serde(rename = "type")]
    pub option_type: OptionType,
    /// String for html/redirect, structured value for json, a list of
    /// action records for actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_token: Option<String>,
    /// Populated at evaluation time from the artifact's declared token keys.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub response_tokens: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metric {
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SAMPLE_ARTIFACT: &str = r#"{
        "version": "1.5.3",
        "meta": {"generatedAt": "2026-08-01T10:00:00Z"},
        "globalMbox": "overall-mbox",
        "geoTargetingEnabled": false,
        "responseTokens": ["activity.id", "activity.decisioningMethod"],
        "localMboxes": ["promo", "slot"],
        "remoteMboxes": ["slot", "recs"],
        "localViews": ["home"],
        "remoteViews": [],
        "rules": [
            {
                "condition": {"<": [0, {"var": "allocation"}, 50]},
                "consequence": {
                    "name": "promo",
                    "options": [{"type": "json", "content": {"variant": "A"}, "eventToken": "tok-a"}],
                    "metrics": []
                },
                "meta": {
                    "ruleKey": "125874",
                    "mboxNames": ["promo"],
                    "activity.id": 125874,
                    "activity.name": "promo ab",
                    "experience.id": 0
                }
            }
        ]
    }"#;

    #[test]
    fn test_artifact_parse() {
        let artifact: RuleArtifact = serde_json::from_str(SAMPLE_ARTIFACT).unwrap();
        assert_eq!(artifact.version, "1.5.3");
        assert_eq!(artifact.global_mbox, "overall-mbox");
        assert_eq!(artifact.rules.len(), 1);

        let rule = &artifact.rules[0];
        assert_eq!(rule.meta.rule_key.as_deref(), Some("125874"));
        assert_eq!(rule.meta.activity_id(), Some(125874));
        assert_eq!(
            rule.meta.token_as_string("activity.name").as_deref(),
            Some("promo ab")
        );
        assert_eq!(rule.consequence.options[0].option_type, OptionType::Json);
    }

    #[test]
    fn test_rule_selection_by_mbox() {
        let artifact: RuleArtifact = serde_json::from_str(SAMPLE_ARTIFACT).unwrap();
        assert_eq!(artifact.rules_for_mbox("promo").count(), 1);
        assert_eq!(artifact.rules_for_mbox("other").count(), 0);
    }

    #[test]
    fn test_rule_selection_by_view_wildcard() {
        let body = r#"{
            "version": "1.0.0",
            "globalMbox": "overall-mbox",
            "rules": [
                {"condition": true, "consequence": {}, "meta": {"viewNames": ["home"]}},
                {"condition": true, "consequence": {}, "meta": {"viewNames": ["plp"]}},
                {"condition": true, "consequence": {}, "meta": {"mboxNames": ["promo"]}}
            ]
        }"#;
        let artifact: RuleArtifact = serde_json::from_str(body).unwrap();
        // A nameless view request selects every view-tagged rule, never
        // mbox-only ones.
        assert_eq!(artifact.rules_for_view(None).count(), 2);
        assert_eq!(artifact.rules_for_view(Some("home")).count(), 1);
    }

    #[test]
    fn test_major_version() {
        assert_eq!(major_version("1.5.3"), Some(1));
        assert_eq!(major_version("2.0.0"), Some(2));
        assert_eq!(major_version("junk"), None);
    }
}
