//! `${token}` template substitution in returned HTML and action content.
//! Unresolvable placeholders are left verbatim, so reprocessing already
//! substituted output is a no-op.

use crate::artifact::{value_to_string, DecisionOption, OptionType, RuleMeta};
use crate::delivery::RequestDetails;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

lazy_static! {
    static ref MACRO_PATTERN: Regex = Regex::new(r"(?i)\$\{([a-zA-Z0-9_.]*?)\}").unwrap();
}

// Legacy facet names still found in older activity content.
const NAME_REPLACEMENTS: &[(&str, &str)] = &[("campaign", "activity"), ("recipe", "experience")];
const NAME_REMOVALS: &[&str] = &["mbox"];

pub struct MacroReplacer<'a> {
    meta: &'a RuleMeta,
    identity: HashMap<&'static str, String>,
    parameters: &'a HashMap<String, String>,
}

impl<'a> MacroReplacer<'a> {
    pub fn new(meta: &'a RuleMeta, details: &RequestDetails<'a>) -> Self {
        let mut identity = HashMap::new();
        if let RequestDetails::Mbox(mbox) = details {
            identity.insert("name", mbox.name.clone());
            identity.insert("index", mbox.index.to_string());
        }
        MacroReplacer {
            meta,
            identity,
            parameters: details.parameters(),
        }
    }

    /// Substitute placeholders in every option that carries textual content:
    /// html options directly, actions options in each action record's
    /// `content` field.
    pub fn apply(&self, options: &mut [DecisionOption]) {
        for option in options {
            match (option.option_type, option.content.as_mut()) {
                (OptionType::Html, Some(Value::String(content))) => {
                    *content = self.substitute(content);
                }
                (OptionType::Actions, Some(Value::Array(actions))) => {
                    for action in actions {
                        if let Some(Value::String(content)) = action.get_mut("content") {
                            *content = self.substitute(content);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn substitute(&self, content: &str) -> String {
        MACRO_PATTERN
            .replace_all(content, |caps: &Captures<'_>| {
                let raw = &caps[1];
                self.resolve(&sanitize_key(raw))
                    .unwrap_or_else(|| format!("${{{raw}}}"))
            })
            .into_owned()
    }

    fn resolve(&self, key: &str) -> Option<String> {
        if let Some(value) = self.meta.tokens.get(key) {
            return Some(value_to_string(value));
        }
        if let Some(value) = self.identity.get(key) {
            return Some(value.clone());
        }
        self.parameters.get(key).cloned()
    }
}

/// Normalize a placeholder key: apply the legacy alias table, keep at most
/// the last two dot-segments, and drop segments on the removal list.
fn sanitize_key(raw: &str) -> String {
    let mut key = raw.to_string();
    for (legacy, current) in NAME_REPLACEMENTS {
        key = key.replace(legacy, current);
    }

    let segments: Vec<&str> = key.split('.').collect();
    let tail = if segments.len() > 2 {
        &segments[segments.len() - 2..]
    } else {
        &segments[..]
    };
    tail.iter()
        .filter(|segment| !NAME_REMOVALS.contains(segment))
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MboxRequest;
    use serde_json::json;

    fn meta_with_tokens(tokens: Value) -> RuleMeta {
        RuleMeta {
            tokens: tokens.as_object().unwrap().clone(),
            ..Default::default()
        }
    }

    fn mbox(name: &str, params: &[(&str, &str)]) -> MboxRequest {
        MboxRequest {
            name: name.to_string(),
            index: 2,
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_meta_lookup_with_segment_collapse() {
        let meta = meta_with_tokens(json!({"activity.id": 125874, "activity.name": "promo ab"}));
        let mbox = mbox("promo", &[]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        assert_eq!(
            replacer.substitute("id=${activity.id} name=${activity.name}"),
            "id=125874 name=promo ab"
        );
        // Longer paths collapse to their last two segments.
        assert_eq!(replacer.substitute("${deep.path.activity.id}"), "125874");
    }

    #[test]
    fn test_legacy_aliases() {
        let meta = meta_with_tokens(json!({"activity.id": 7, "experience.id": 1}));
        let mbox = mbox("promo", &[]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        assert_eq!(replacer.substitute("${campaign.id}"), "7");
        assert_eq!(replacer.substitute("${recipe.id}"), "1");
    }

    #[test]
    fn test_mbox_segment_removal_and_identity() {
        let meta = meta_with_tokens(json!({}));
        let mbox = mbox("hero-banner", &[]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        // ${mbox.name} collapses to "name", resolved from the detail identity.
        assert_eq!(replacer.substitute("${mbox.name}"), "hero-banner");
        assert_eq!(replacer.substitute("${mbox.index}"), "2");
    }

    #[test]
    fn test_parameter_lookup() {
        let meta = meta_with_tokens(json!({}));
        let mbox = mbox("promo", &[("user_tier", "gold")]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        assert_eq!(replacer.substitute("Hello ${user_tier}!"), "Hello gold!");
    }

    #[test]
    fn test_unresolved_placeholder_left_verbatim() {
        let meta = meta_with_tokens(json!({}));
        let mbox = mbox("promo", &[]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        let content = "keep ${foo.bar.baz} as-is";
        let once = replacer.substitute(content);
        assert_eq!(once, content);
        // Idempotent on its own output.
        assert_eq!(replacer.substitute(&once), content);
    }

    #[test]
    fn test_plain_content_unchanged() {
        let meta = meta_with_tokens(json!({}));
        let mbox = mbox("promo", &[]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        assert_eq!(replacer.substitute("<p>no macros here</p>"), "<p>no macros here</p>");
    }

    #[test]
    fn test_actions_content_substituted() {
        let meta = meta_with_tokens(json!({"activity.name": "spring sale"}));
        let mbox = mbox("promo", &[]);
        let replacer = MacroReplacer::new(&meta, &RequestDetails::Mbox(&mbox));
        let mut options = vec![DecisionOption {
            option_type: OptionType::Actions,
            content: Some(json!([
                {"type": "setHtml", "selector": "#banner", "content": "Now on: ${activity.name}"}
            ])),
            event_token: None,
            response_tokens: Default::default(),
        }];
        replacer.apply(&mut options);
        assert_eq!(
            options[0].content.as_ref().unwrap()[0]["content"],
            "Now on: spring sale"
        );
    }
}
