use super::ParamsCollator;
use crate::delivery::{ClientHints, DeliveryRequest, RequestDetails};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

pub const USER_BROWSER_TYPE: &str = "browserType";
pub const USER_BROWSER_VERSION: &str = "browserVersion";
pub const USER_PLATFORM: &str = "platform";

const UNKNOWN: &str = "unknown";

// Order matters: Chrome UAs also say Safari, Edge UAs also say Chrome.
const BROWSER_MATCHERS: &[(&str, fn(&str) -> bool)] = &[
    ("chrome", |ua| {
        (ua.contains("Chrome") || ua.contains("CriOS"))
            && !ua.contains("OPR")
            && !ua.contains("Edge/")
    }),
    ("firefox", |ua| ua.contains("Firefox")),
    ("ie", |ua| ua.contains("MSIE") || ua.contains("Trident")),
    ("opera", |ua| ua.contains("Opera") || ua.contains("OPR")),
    ("ipad", |ua| ua.contains("iPad")),
    ("iphone", |ua| ua.contains("iPhone")),
    ("safari", |ua| {
        ua.contains("Safari")
            && !ua.contains("Chrome")
            && !ua.contains("OPR")
            && !ua.contains("CriOS")
    }),
    ("edge", |ua| ua.contains("Edge")),
];

const PLATFORM_MAPPING: &[(&str, &str)] = &[
    ("Windows", "windows"),
    ("Macintosh", "mac"),
    ("Mac OS", "mac"),
    ("macOS", "mac"),
    ("Linux", "linux"),
];

lazy_static! {
    static ref VERSION_PATTERNS: Vec<(&'static str, Vec<Regex>)> = vec![
        ("chrome", compile(&[r"chrome/(\d+)", r"crios/(\d+)", r#"Chrome";v="(\d+)"#])),
        ("firefox", compile(&[r"firefox/(\d+)"])),
        ("ie", compile(&[r"msie\s(\d+)", r"rv:(\d+)"])),
        (
            "opera",
            compile(&[r"version/(\d+)", r"opera/(\d+)", r"opera\s*(\d+)", r"OPR/(\d+)"])
        ),
        ("ipad", compile(&[r"version/(\d+)"])),
        ("iphone", compile(&[r"version/(\d+)"])),
        ("safari", compile(&[r"version/(\d+)"])),
        ("edge", compile(&[r"edge/(\d+)", r#"Edge";v="(\d+)"#])),
    ];
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

/// Browser and platform facts derived from the user-agent string, preferring
/// client hints when the request carries them.
#[derive(Default)]
pub struct UserParamsCollator;

impl ParamsCollator for UserParamsCollator {
    fn collate(
        &self,
        request: &DeliveryRequest,
        _details: Option<&RequestDetails<'_>>,
    ) -> Map<String, Value> {
        let context = request.context.as_ref();
        let user_agent = context.and_then(|c| c.user_agent.as_deref()).unwrap_or("");
        let client_hints = context.and_then(|c| c.client_hints.as_ref());

        let browser_info = browser_info(user_agent, client_hints);
        let browser_type = parse_browser_type(browser_info);

        let mut user = Map::new();
        user.insert(USER_BROWSER_TYPE.to_string(), Value::from(browser_type));
        user.insert(
            USER_PLATFORM.to_string(),
            Value::from(parse_platform(user_agent, client_hints)),
        );
        user.insert(
            USER_BROWSER_VERSION.to_string(),
            Value::from(parse_browser_version(browser_info, browser_type)),
        );
        user
    }
}

fn browser_info<'a>(user_agent: &'a str, client_hints: Option<&'a ClientHints>) -> &'a str {
    if let Some(hints) = client_hints {
        if let Some(full) = hints.browser_ua_with_full_version.as_deref() {
            if !full.is_empty() {
                return full;
            }
        }
        if let Some(major) = hints.browser_ua_with_major_version.as_deref() {
            if !major.is_empty() {
                return major;
            }
        }
    }
    user_agent
}

fn parse_browser_type(browser_info: &str) -> &'static str {
    if browser_info.is_empty() {
        return UNKNOWN;
    }
    BROWSER_MATCHERS
        .iter()
        .find(|(_, matcher)| matcher(browser_info))
        .map(|(name, _)| *name)
        .unwrap_or(UNKNOWN)
}

fn parse_platform(user_agent: &str, client_hints: Option<&ClientHints>) -> &'static str {
    let platform_info = match client_hints.and_then(|h| h.platform.as_deref()) {
        Some(platform) if !platform.is_empty() => platform,
        _ if !user_agent.is_empty() => user_agent,
        _ => return UNKNOWN,
    };
    PLATFORM_MAPPING
        .iter()
        .find(|(needle, _)| platform_info.contains(needle))
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN)
}

fn parse_browser_version(browser_info: &str, browser_type: &str) -> String {
    let Some((_, patterns)) = VERSION_PATTERNS
        .iter()
        .find(|(name, _)| *name == browser_type)
    else {
        return UNKNOWN.to_string();
    };
    patterns
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(browser_info)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}
