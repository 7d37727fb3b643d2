//! Textual rewriting of backend URLs to gateway-public paths.
//!
//! Payloads coming back from backends may embed absolute links to the
//! backend's own network location. Those are rewritten to the gateway's
//! public path for the owning endpoint so internal locations never leak to
//! clients. The rewrite is deliberately textual over the serialized payload
//! rather than a structural traversal; the boundary check below keeps it
//! from corrupting longer locations that merely share a prefix.

use directory::Directory;
use serde_json::Value;
use std::sync::Arc;

/// Characters that may legally follow a rewritten location. Anything else
/// means the match is a prefix of a longer token and must be left alone.
fn is_boundary(c: char) -> bool {
    matches!(
        c,
        '/' | '?' | '#' | '&' | '"' | '\'' | '<' | '>' | ',' | ')' | ']' | '}' | '\\'
    ) || c.is_whitespace()
}

/// Replaces occurrences of `origin` with `public`, accepting a match only
/// when it ends at a token boundary.
pub fn rewrite_location(text: &str, origin: &str, public: &str) -> String {
    if origin.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(idx) = rest.find(origin) {
        let after = &rest[idx + origin.len()..];
        out.push_str(&rest[..idx]);

        if after.chars().next().is_none_or(is_boundary) {
            out.push_str(public);
        } else {
            out.push_str(origin);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Rewrites every known endpoint's backend base URL to its gateway-public
/// path for the given environment.
#[derive(Clone)]
pub struct UrlRewriter {
    directory: Arc<Directory>,
}

impl UrlRewriter {
    pub fn new(directory: Arc<Directory>) -> Self {
        UrlRewriter { directory }
    }

    pub fn rewrite_payload(&self, text: &str, environment: &str) -> String {
        let mut out = text.to_string();
        for endpoint in self.directory.definitions() {
            let origin = endpoint.base_url.as_str().trim_end_matches('/');
            out = rewrite_location(&out, origin, &endpoint.public_path(environment));
        }
        out
    }

    /// Rewrites a JSON document by serializing, rewriting, and re-parsing.
    /// Falls back to the original value if the rewritten text no longer
    /// parses, which only happens when a payload embeds an origin URL in a
    /// position where substitution breaks the document structure.
    pub fn rewrite_value(&self, value: &Value, environment: &str) -> Value {
        let serialized = value.to_string();
        let rewritten = self.rewrite_payload(&serialized, environment);
        if rewritten == serialized {
            return value.clone();
        }
        serde_json::from_str(&rewritten).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "URL rewrite produced unparseable document, keeping original");
            value.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory::{AllowedEnvironments, EndpointDefinition, HttpMethod};
    use url::Url;

    fn endpoint(name: &str, base_url: &str) -> EndpointDefinition {
        EndpointDefinition {
            name: name.to_string(),
            base_url: Url::parse(base_url).unwrap(),
            allowed_methods: vec![HttpMethod::Get],
            is_private: false,
            allowed_environments: AllowedEnvironments::All,
            cache_ttl_secs: None,
            composite: None,
        }
    }

    fn rewriter(endpoints: Vec<EndpointDefinition>) -> UrlRewriter {
        UrlRewriter::new(Arc::new(Directory::from_definitions(endpoints)))
    }

    #[test]
    fn test_rewrite_location_at_boundaries() {
        let origin = "http://10.0.0.5:8080/crm";
        assert_eq!(
            rewrite_location("see http://10.0.0.5:8080/crm/customers/1 now", origin, "/api/prod/customers"),
            "see /api/prod/customers/customers/1 now"
        );
        // end of input counts as a boundary
        assert_eq!(
            rewrite_location("http://10.0.0.5:8080/crm", origin, "/api/prod/customers"),
            "/api/prod/customers"
        );
    }

    #[test]
    fn test_rewrite_location_leaves_longer_tokens_alone() {
        let origin = "http://10.0.0.5:8080/crm";
        let text = "http://10.0.0.5:8080/crm-legacy/customers";
        assert_eq!(rewrite_location(text, origin, "/api/prod/customers"), text);
    }

    #[test]
    fn test_rewrite_location_multiple_occurrences() {
        let rewritten = rewrite_location(
            r#"{"a":"http://b/x/1","b":"http://b/x/2"}"#,
            "http://b/x",
            "/api/e/x",
        );
        assert_eq!(rewritten, r#"{"a":"/api/e/x/1","b":"/api/e/x/2"}"#);
    }

    #[test]
    fn test_rewrite_value_replaces_links() {
        let rewriter = rewriter(vec![endpoint("customers", "http://10.0.0.5:8080/crm")]);
        let value = serde_json::json!({
            "id": 7,
            "link": "http://10.0.0.5:8080/crm/customers/7"
        });

        let rewritten = rewriter.rewrite_value(&value, "prod");
        assert_eq!(rewritten["link"], "/api/prod/customers/customers/7");
        assert_eq!(rewritten["id"], 7);
    }

    #[test]
    fn test_rewrite_value_unrelated_content_unchanged() {
        let rewriter = rewriter(vec![endpoint("customers", "http://10.0.0.5:8080/crm")]);
        let value = serde_json::json!({"note": "http://other-host/crm/x"});
        assert_eq!(rewriter.rewrite_value(&value, "prod"), value);
    }
}
