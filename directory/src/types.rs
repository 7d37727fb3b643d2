use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

/// HTTP methods an endpoint may be invoked with
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_method(&self) -> http::Method {
        match self {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

impl PartialEq<http::Method> for HttpMethod {
    fn eq(&self, other: &http::Method) -> bool {
        self.as_method() == *other
    }
}

/// Which environments an endpoint may be invoked from. Definition files spell
/// this as the keyword `all` or an explicit list of environment names.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum AllowedEnvironments {
    #[default]
    All,
    Only(HashSet<String>),
}

impl AllowedEnvironments {
    pub fn allows(&self, environment: &str) -> bool {
        match self {
            AllowedEnvironments::All => true,
            AllowedEnvironments::Only(set) => set.contains(environment),
        }
    }
}

impl<'de> Deserialize<'de> for AllowedEnvironments {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            List(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(word) if word == "all" => Ok(AllowedEnvironments::All),
            Repr::Keyword(word) => Err(serde::de::Error::custom(format!(
                "expected \"all\" or a list of environments, got \"{word}\""
            ))),
            Repr::List(list) => Ok(AllowedEnvironments::Only(list.into_iter().collect())),
        }
    }
}

/// A gateway endpoint: either a plain proxied backend or, when `composite`
/// is present, a multi-step workflow definition.
///
/// Definitions are immutable once loaded; the directory hands out `Arc`
/// clones and swaps the whole set on reload.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointDefinition {
    pub name: String,
    /// Backend base URL requests for this endpoint are forwarded to
    pub base_url: Url,
    pub allowed_methods: Vec<HttpMethod>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub allowed_environments: AllowedEnvironments,
    /// Endpoint-specific cache TTL for GET responses, overriding the global
    /// default but not a backend-supplied Cache-Control max-age
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub composite: Option<CompositeDefinition>,
}

impl EndpointDefinition {
    pub fn allows_method(&self, method: &http::Method) -> bool {
        self.allowed_methods.iter().any(|m| m == method)
    }

    pub fn allows_environment(&self, environment: &str) -> bool {
        self.allowed_environments.allows(environment)
    }

    /// The gateway-public path backend URLs for this endpoint are rewritten to
    pub fn public_path(&self, environment: &str) -> String {
        format!("/api/{environment}/{}", self.name)
    }

    pub fn is_composite(&self) -> bool {
        self.composite.is_some()
    }
}

/// A multi-step workflow executed inside one client request. Step order in
/// the document is the default execution order.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CompositeDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<CompositeStep>,
}

impl CompositeDefinition {
    /// Computes the execution schedule: repeatedly picks, in declared order,
    /// the first unexecuted step whose dependency (if any) has completed.
    ///
    /// Returns `None` when the definition cannot be fully scheduled, i.e. a
    /// `depends_on` names an unknown step or forms a cycle. A step may only
    /// have a single predecessor, so definitions are chains/trees by
    /// construction; this check catches the remaining malformed cases.
    pub fn schedule(&self) -> Option<Vec<&CompositeStep>> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.steps.len());

        while order.len() < self.steps.len() {
            let next = self.steps.iter().find(|step| {
                !done.contains(step.name.as_str())
                    && step
                        .depends_on
                        .as_deref()
                        .is_none_or(|dep| done.contains(dep))
            })?;
            done.insert(next.name.as_str());
            order.push(next);
        }

        Some(order)
    }
}

/// One step of a composite definition
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CompositeStep {
    /// Unique within the definition
    pub name: String,
    /// Endpoint name resolved through the directory at execution time
    pub target_endpoint: String,
    pub method: HttpMethod,
    /// At most one predecessor; the step runs only after it completed
    #[serde(default)]
    pub depends_on: Option<String>,
    /// When set, the step repeats once per element of `array_property`
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub array_property: Option<String>,
    /// Path into the request root (or the dependency's result) selecting the
    /// step's input document; the whole root when absent
    #[serde(default)]
    pub source_property: Option<String>,
    /// Field name -> template expression, applied to each element document
    #[serde(default)]
    pub transformations: IndexMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, depends_on: Option<&str>) -> CompositeStep {
        CompositeStep {
            name: name.to_string(),
            target_endpoint: "backend".to_string(),
            method: HttpMethod::Post,
            depends_on: depends_on.map(str::to_string),
            is_array: false,
            array_property: None,
            source_property: None,
            transformations: IndexMap::new(),
        }
    }

    #[test]
    fn test_schedule_declared_order_for_independent_steps() {
        let definition = CompositeDefinition {
            name: String::new(),
            description: String::new(),
            steps: vec![step("a", None), step("b", None), step("c", None)],
        };

        let order: Vec<&str> = definition
            .schedule()
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_schedule_defers_forward_dependency() {
        // "a" depends on "b" which is declared later; "b" must run first
        let definition = CompositeDefinition {
            name: String::new(),
            description: String::new(),
            steps: vec![step("a", Some("b")), step("b", None)],
        };

        let order: Vec<&str> = definition
            .schedule()
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_schedule_rejects_unknown_dependency() {
        let definition = CompositeDefinition {
            name: String::new(),
            description: String::new(),
            steps: vec![step("a", Some("missing"))],
        };
        assert!(definition.schedule().is_none());
    }

    #[test]
    fn test_schedule_rejects_cycle() {
        let definition = CompositeDefinition {
            name: String::new(),
            description: String::new(),
            steps: vec![step("a", Some("b")), step("b", Some("a"))],
        };
        assert!(definition.schedule().is_none());
    }

    #[test]
    fn test_allowed_environments() {
        let all: AllowedEnvironments = serde_yaml::from_str("all").unwrap();
        assert!(all.allows("prod"));

        let only: AllowedEnvironments = serde_yaml::from_str("[staging, dev]").unwrap();
        assert!(only.allows("staging"));
        assert!(!only.allows("prod"));

        assert!(serde_yaml::from_str::<AllowedEnvironments>("everything").is_err());
    }
}
