//! Ingress routes of an instance, as the URLs an operator would open.

use crate::cluster::RouteRule;
use crate::listing::render_table;

/// Regex residue left at the end of ingress paths such as `/loader(/|$)(.*)`
const PATH_PATTERN_TAIL: &[char] = &['(', ')', '$', '.', '*', '|', '/'];

/// One line of `gmskube ingress`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRoute {
    pub service: String,
    pub url: String,
}

impl IngressRoute {
    /// Virtual service prefixes are used as is. Ingress paths are
    /// patterns, so their trailing capture groups are dropped.
    pub fn from_rule(rule: &RouteRule, port: &str, istio: bool) -> Self {
        let mut path = rule.path.trim_matches('/');
        if !istio {
            path = path.trim_end_matches(PATH_PATTERN_TAIL);
        }

        Self {
            service: rule.service.clone(),
            url: format!("https://{}:{port}/{path}", rule.host),
        }
    }
}

pub fn render_routes(routes: &[IngressRoute]) -> String {
    let rows: Vec<[&str; 2]> = routes
        .iter()
        .map(|r| [r.service.as_str(), r.url.as_str()])
        .collect();
    render_table(["SERVICE", "URL"], &rows)
}
