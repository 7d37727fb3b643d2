use crate::config::{EndpointsFile, ValidationError};
use crate::metrics_defs::{DIRECTORY_RELOADS, DIRECTORY_RELOAD_FAILURES};
use crate::types::EndpointDefinition;
use parking_lot::RwLock;
use shared::counter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to read endpoint definitions: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse endpoint definitions: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid endpoint definitions: {0}")]
    Validation(#[from] ValidationError),

    #[error("Directory has no definition file to reload from")]
    NoSourceFile,
}

/// Resolves logical endpoint names to their definitions.
///
/// An explicitly constructed, dependency-injected instance: callers hold an
/// `Arc<Directory>` and the definition set is swapped wholesale on `reload`.
/// There is no ambient global state.
#[derive(Debug)]
pub struct Directory {
    inner: RwLock<HashMap<String, Arc<EndpointDefinition>>>,
    source: Option<PathBuf>,
    // Used by the readiness check. Set once any definition set has loaded.
    ready: AtomicBool,
}

impl Directory {
    /// Loads definitions from a YAML file and keeps the path for `reload`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, DirectoryError> {
        let path = path.into();
        let endpoints = read_definitions(&path)?;
        let directory = Directory {
            inner: RwLock::new(index(endpoints)),
            source: Some(path),
            ready: AtomicBool::new(true),
        };
        Ok(directory)
    }

    /// Builds a directory from an in-memory definition set. No reload source.
    pub fn from_definitions(endpoints: Vec<EndpointDefinition>) -> Self {
        Directory {
            inner: RwLock::new(index(endpoints)),
            source: None,
            ready: AtomicBool::new(true),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<EndpointDefinition>> {
        self.inner.read().get(name).cloned()
    }

    /// All current definitions, used by the URL rewriter to scan payloads
    /// for backend base URLs.
    pub fn definitions(&self) -> Vec<Arc<EndpointDefinition>> {
        self.inner.read().values().cloned().collect()
    }

    /// Re-reads the definition file and swaps the whole set. The previous
    /// set stays in place when loading or validation fails.
    pub fn reload(&self) -> Result<(), DirectoryError> {
        let path = self.source.as_ref().ok_or(DirectoryError::NoSourceFile)?;
        let endpoints = match read_definitions(path) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                counter!(DIRECTORY_RELOAD_FAILURES).increment(1);
                tracing::error!(error = %e, "Endpoint definition reload failed");
                return Err(e);
            }
        };

        let count = endpoints.len();
        *self.inner.write() = index(endpoints);
        self.ready.store(true, Ordering::Relaxed);
        counter!(DIRECTORY_RELOADS).increment(1);
        tracing::info!(endpoints = count, "Endpoint definitions reloaded");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

fn read_definitions(path: &PathBuf) -> Result<Vec<EndpointDefinition>, DirectoryError> {
    let raw = std::fs::read_to_string(path)?;
    let file: EndpointsFile = serde_yaml::from_str(&raw)?;
    file.validate()?;
    Ok(file.endpoints)
}

fn index(endpoints: Vec<EndpointDefinition>) -> HashMap<String, Arc<EndpointDefinition>> {
    endpoints
        .into_iter()
        .map(|e| (e.name.clone(), Arc::new(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEFINITIONS: &str = r#"
endpoints:
    - name: customers
      base_url: "http://10.0.0.5:8080/crm"
      allowed_methods: [GET]
"#;

    fn write_file(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("endpoints.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, DEFINITIONS);

        let directory = Directory::load(&path).unwrap();
        assert!(directory.is_ready());
        assert!(directory.lookup("customers").is_some());
        assert!(directory.lookup("missing").is_none());
    }

    #[test]
    fn test_reload_swaps_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, DEFINITIONS);

        let directory = Directory::load(&path).unwrap();
        write_file(
            &dir,
            r#"
endpoints:
    - name: invoices
      base_url: "http://10.0.0.6:8080/billing"
      allowed_methods: [GET]
"#,
        );

        directory.reload().unwrap();
        assert!(directory.lookup("customers").is_none());
        assert!(directory.lookup("invoices").is_some());
    }

    #[test]
    fn test_failed_reload_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, DEFINITIONS);

        let directory = Directory::load(&path).unwrap();
        write_file(&dir, "endpoints: [{name: broken}]");

        assert!(directory.reload().is_err());
        assert!(directory.lookup("customers").is_some());
    }

    #[test]
    fn test_in_memory_directory_has_no_reload_source() {
        let directory = Directory::from_definitions(vec![]);
        assert!(matches!(
            directory.reload().unwrap_err(),
            DirectoryError::NoSourceFile
        ));
    }

    #[test]
    fn test_load_rejects_invalid_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            r#"
endpoints:
    - name: dup
      base_url: "http://127.0.0.1:1/a"
      allowed_methods: [GET]
    - name: dup
      base_url: "http://127.0.0.1:1/b"
      allowed_methods: [GET]
"#,
        );
        assert!(matches!(
            Directory::load(&path).unwrap_err(),
            DirectoryError::Validation(ValidationError::DuplicateEndpoint(_))
        ));
    }
}
