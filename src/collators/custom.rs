use super::ParamsCollator;
use crate::delivery::{DeliveryRequest, RequestDetails};
use serde_json::{Map, Value};

const LOWER_CASE_POSTFIX: &str = "_lc";

/// Custom request parameters for the `mbox` namespace. Every parameter is
/// copied verbatim; parameters without dots additionally get a `_lc`
/// duplicate, and well-formed dotted keys are expanded into nested maps so
/// conditions can address them as `mbox.a.b`. A dotted key with any empty
/// segment is left verbatim only.
#[derive(Default)]
pub struct CustomParamsCollator;

impl ParamsCollator for CustomParamsCollator {
    fn collate(
        &self,
        _request: &DeliveryRequest,
        details: Option<&RequestDetails<'_>>,
    ) -> Map<String, Value> {
        let mut custom = Map::new();
        let Some(details) = details else {
            return custom;
        };

        for (key, value) in details.parameters() {
            custom.insert(key.clone(), Value::from(value.clone()));
            if !key.contains('.') {
                custom.insert(
                    format!("{key}{LOWER_CASE_POSTFIX}"),
                    Value::from(value.to_lowercase()),
                );
            } else if key.split('.').all(|segment| !segment.is_empty()) {
                insert_nested(&mut custom, key, value);
            }
        }
        custom
    }
}

fn insert_nested(custom: &mut Map<String, Value>, key: &str, value: &str) {
    let segments: Vec<&str> = key.split('.').collect();
    let (leaf, parents) = segments.split_last().unwrap();

    let mut current = custom;
    for parent in parents {
        let entry = current
            .entry(parent.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        // A scalar parameter may already sit at this name; dotted expansion
        // does not clobber it.
        if !entry.is_object() {
            return;
        }
        current = entry.as_object_mut().unwrap();
    }
    current.insert(leaf.to_string(), Value::from(value));
    current.insert(
        format!("{leaf}{LOWER_CASE_POSTFIX}"),
        Value::from(value.to_lowercase()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::PageLoadRequest;
    use std::collections::HashMap;

    fn collate(params: &[(&str, &str)]) -> Map<String, Value> {
        let parameters: HashMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let page_load = PageLoadRequest {
            parameters,
            ..Default::default()
        };
        let details = RequestDetails::PageLoad(&page_load);
        CustomParamsCollator.collate(&DeliveryRequest::default(), Some(&details))
    }

    #[test]
    fn test_flat_params_with_lowercase_duplicates() {
        let custom = collate(&[("foo", "bar"), ("BAZ", "BUZ")]);
        assert_eq!(custom["foo"], "bar");
        assert_eq!(custom["foo_lc"], "bar");
        assert_eq!(custom["BAZ"], "BUZ");
        assert_eq!(custom["BAZ_lc"], "buz");
    }

    #[test]
    fn test_dot_notation_expansion() {
        let custom = collate(&[
            ("dot.notation", "isConfusing"),
            ("first.second.third", "value"),
            ("first.second.wonky", "DONKEY"),
        ]);

        let dot = custom["dot"].as_object().unwrap();
        assert_eq!(dot["notation"], "isConfusing");
        assert_eq!(dot["notation_lc"], "isconfusing");

        let second = custom["first"].as_object().unwrap()["second"]
            .as_object()
            .unwrap();
        assert_eq!(second["third"], "value");
        assert_eq!(second["third_lc"], "value");
        assert_eq!(second["wonky"], "DONKEY");
        assert_eq!(second["wonky_lc"], "donkey");
    }

    #[test]
    fn test_malformed_dotted_keys_stay_verbatim() {
        let custom = collate(&[
            ("this..should..be", "ignored"),
            (".something", "aaa"),
            ("=cranky .chicken.", "bbb"),
        ]);
        assert_eq!(custom["this..should..be"], "ignored");
        assert_eq!(custom[".something"], "aaa");
        assert_eq!(custom["=cranky .chicken."], "bbb");
        assert!(!custom.contains_key("this"));
    }
}
