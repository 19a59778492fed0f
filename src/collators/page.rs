use super::ParamsCollator;
use crate::delivery::{Address, DeliveryRequest, RequestDetails};
use serde_json::{Map, Value};
use url::Url;

const LOWER_CASE_POSTFIX: &str = "_lc";

/// URL-derived facts for the `page` and `referring` namespaces. Every fact
/// is emitted twice: verbatim, and lower-cased under a `_lc`-suffixed key.
pub struct PageParamsCollator {
    referring: bool,
}

impl PageParamsCollator {
    pub fn page() -> Self {
        PageParamsCollator { referring: false }
    }

    pub fn referring() -> Self {
        PageParamsCollator { referring: true }
    }

    fn pick_url<'a>(&self, address: Option<&'a Address>) -> Option<&'a str> {
        let address = address?;
        if self.referring {
            address.referring_url.as_deref()
        } else {
            address.url.as_deref()
        }
    }
}

impl ParamsCollator for PageParamsCollator {
    fn collate(
        &self,
        request: &DeliveryRequest,
        details: Option<&RequestDetails<'_>>,
    ) -> Map<String, Value> {
        // Detail-level address wins over the request context's.
        let address = details
            .and_then(|d| d.address())
            .or_else(|| request.context.as_ref().and_then(|c| c.address.as_ref()));
        let raw_url = self.pick_url(address).unwrap_or("");
        page_params(raw_url)
    }
}

fn page_params(raw_url: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let parsed = Url::parse(raw_url).ok();

    let host = parsed
        .as_ref()
        .and_then(|u| u.host_str())
        .unwrap_or("")
        .to_string();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let subdomain = if labels.len() > 2 {
        labels[0].to_string()
    } else {
        String::new()
    };
    let top_level_domain = labels.last().copied().unwrap_or("").to_string();

    let path = parsed.as_ref().map(|u| u.path().to_string()).unwrap_or_default();
    let query = parsed
        .as_ref()
        .and_then(|u| u.query())
        .unwrap_or("")
        .to_string();
    let fragment = parsed
        .as_ref()
        .and_then(|u| u.fragment())
        .unwrap_or("")
        .to_string();

    let url = if parsed.is_some() { raw_url } else { "" };
    put(&mut params, "url", url);
    put(&mut params, "path", &path);
    put(&mut params, "domain", &host);
    put(&mut params, "subdomain", &subdomain);
    put(&mut params, "topLevelDomain", &top_level_domain);
    put(&mut params, "query", &query);
    put(&mut params, "fragment", &fragment);
    params
}

fn put(params: &mut Map<String, Value>, key: &str, value: &str) {
    params.insert(key.to_string(), Value::from(value));
    params.insert(
        format!("{key}{LOWER_CASE_POSTFIX}"),
        Value::from(value.to_lowercase()),
    );
}
