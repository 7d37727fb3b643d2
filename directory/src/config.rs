use crate::types::EndpointDefinition;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Empty endpoint name")]
    EmptyEndpointName,

    #[error("Duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),

    #[error("Endpoint {0} allows no methods")]
    NoMethods(String),

    #[error("Endpoint {endpoint} has no composite steps")]
    EmptyComposite { endpoint: String },

    #[error("Endpoint {endpoint} declares step {step} more than once")]
    DuplicateStep { endpoint: String, step: String },

    #[error("Endpoint {endpoint} step {step} is an array step without array_property")]
    MissingArrayProperty { endpoint: String, step: String },

    #[error(
        "Endpoint {endpoint} composite cannot be scheduled (unknown or cyclic depends_on); \
         steps may have at most one predecessor and every dependency must be satisfiable"
    )]
    UnschedulableComposite { endpoint: String },
}

/// On-disk endpoint definition set, one YAML document per deployment
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointsFile {
    pub endpoints: Vec<EndpointDefinition>,
}

impl EndpointsFile {
    /// Validates the definition set. Composite definitions that cannot be
    /// fully scheduled are rejected here so the orchestrator never sees them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                return Err(ValidationError::EmptyEndpointName);
            }
            if !names.insert(&endpoint.name) {
                return Err(ValidationError::DuplicateEndpoint(endpoint.name.clone()));
            }
            if endpoint.allowed_methods.is_empty() {
                return Err(ValidationError::NoMethods(endpoint.name.clone()));
            }

            let Some(composite) = &endpoint.composite else {
                continue;
            };

            if composite.steps.is_empty() {
                return Err(ValidationError::EmptyComposite {
                    endpoint: endpoint.name.clone(),
                });
            }

            let mut step_names = HashSet::new();
            for step in &composite.steps {
                if !step_names.insert(&step.name) {
                    return Err(ValidationError::DuplicateStep {
                        endpoint: endpoint.name.clone(),
                        step: step.name.clone(),
                    });
                }
                if step.is_array && step.array_property.is_none() {
                    return Err(ValidationError::MissingArrayProperty {
                        endpoint: endpoint.name.clone(),
                        step: step.name.clone(),
                    });
                }
            }

            if composite.schedule().is_none() {
                return Err(ValidationError::UnschedulableComposite {
                    endpoint: endpoint.name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpMethod;

    const VALID_YAML: &str = r#"
endpoints:
    - name: customers
      base_url: "http://10.0.0.5:8080/crm"
      allowed_methods: [GET, POST]
      allowed_environments: all
      cache_ttl_secs: 120
    - name: invoices
      base_url: "http://10.0.0.6:8080/billing"
      allowed_methods: [GET]
      is_private: true
      allowed_environments:
          - staging
    - name: create-order
      base_url: "http://10.0.0.7:8080/orders"
      allowed_methods: [POST]
      composite:
          name: create-order
          description: header plus lines in one request
          steps:
              - name: CreateLines
                target_endpoint: invoices
                method: POST
                is_array: true
                array_property: Lines
                transformations:
                    TxKey: $guid
              - name: CreateHeader
                target_endpoint: customers
                method: POST
                depends_on: CreateLines
                source_property: Header
                transformations:
                    TxKey: $prev.CreateLines.0.TxKey
"#;

    #[test]
    fn test_parse_valid_definitions() {
        let file: EndpointsFile = serde_yaml::from_str(VALID_YAML).unwrap();
        assert!(file.validate().is_ok());

        assert_eq!(file.endpoints.len(), 3);
        assert_eq!(file.endpoints[0].name, "customers");
        assert_eq!(file.endpoints[0].cache_ttl_secs, Some(120));
        assert!(file.endpoints[0].allows_environment("prod"));
        assert!(!file.endpoints[1].allows_environment("prod"));
        assert!(file.endpoints[1].is_private);

        let composite = file.endpoints[2].composite.as_ref().unwrap();
        assert_eq!(composite.steps.len(), 2);
        assert_eq!(composite.steps[0].method, HttpMethod::Post);
        assert!(composite.steps[0].is_array);
        assert_eq!(
            composite.steps[0].transformations.get("TxKey").unwrap(),
            "$guid"
        );
        assert_eq!(composite.steps[1].depends_on.as_deref(), Some("CreateLines"));
    }

    #[test]
    fn test_validation_errors() {
        let base: EndpointsFile = serde_yaml::from_str(VALID_YAML).unwrap();

        // Duplicate endpoint name
        let mut file = base.clone();
        file.endpoints.push(file.endpoints[0].clone());
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::DuplicateEndpoint(_)
        ));

        // Empty endpoint name
        let mut file = base.clone();
        file.endpoints[0].name = String::new();
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::EmptyEndpointName
        ));

        // No allowed methods
        let mut file = base.clone();
        file.endpoints[1].allowed_methods.clear();
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::NoMethods(_)
        ));

        // Duplicate step name
        let mut file = base.clone();
        let composite = file.endpoints[2].composite.as_mut().unwrap();
        let duplicated = composite.steps[0].clone();
        composite.steps.push(duplicated);
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::DuplicateStep { .. }
        ));

        // Array step without array_property
        let mut file = base.clone();
        file.endpoints[2].composite.as_mut().unwrap().steps[0].array_property = None;
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::MissingArrayProperty { .. }
        ));

        // Unknown dependency
        let mut file = base.clone();
        file.endpoints[2].composite.as_mut().unwrap().steps[1].depends_on =
            Some("NoSuchStep".to_string());
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::UnschedulableComposite { .. }
        ));

        // Empty composite
        let mut file = base;
        file.endpoints[2].composite.as_mut().unwrap().steps.clear();
        assert!(matches!(
            file.validate().unwrap_err(),
            ValidationError::EmptyComposite { .. }
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid base URL
        assert!(
            serde_yaml::from_str::<EndpointsFile>(
                r#"
endpoints:
    - name: bad
      base_url: "not-a-url"
      allowed_methods: [GET]
"#
            )
            .is_err()
        );

        // Invalid method
        assert!(
            serde_yaml::from_str::<EndpointsFile>(
                r#"
endpoints:
    - name: bad
      base_url: "http://127.0.0.1:8080"
      allowed_methods: [FETCH]
"#
            )
            .is_err()
        );

        // Missing required field
        assert!(
            serde_yaml::from_str::<EndpointsFile>(
                r#"
endpoints:
    - name: bad
"#
            )
            .is_err()
        );
    }
}
