use std::path::Path;

use serde_json::Value;

use crate::{coerce_descriptor, repair_json, RelayError, RequestDescriptor};

/// Source of the requests offered when the agent asks what we know about.
pub(crate) trait RequestCatalog {
    fn known_requests(&self) -> Vec<RequestDescriptor>;
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StaticCatalog {
    requests: Vec<RequestDescriptor>,
}

impl StaticCatalog {
    pub(crate) fn new(requests: Vec<RequestDescriptor>) -> Self {
        Self { requests }
    }

    pub(crate) fn load(path: &Path) -> Result<Self, RelayError> {
        Ok(Self::new(load_descriptors(path)?))
    }
}

impl RequestCatalog for StaticCatalog {
    fn known_requests(&self) -> Vec<RequestDescriptor> {
        self.requests.clone()
    }
}

/// Reads a JSON array of descriptors. The same leniency as chat text applies,
/// so a file pasted from an agent reply loads as-is.
pub(crate) fn load_descriptors(path: &Path) -> Result<Vec<RequestDescriptor>, RelayError> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&repair_json(&text))
        .map_err(|err| RelayError::config(path, err.to_string()))?;
    let Value::Array(items) = value else {
        return Err(RelayError::config(path, "expected an array of request descriptors"));
    };
    Ok(items.iter().filter_map(coerce_descriptor).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_lenient_descriptor_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        std::fs::write(
            &path,
            "[{method: 'get', url: 'http://x/a'}, {method: 'POST', url: 'http://x/b', body: 'k=v',},]",
        )
        .unwrap();

        let catalog = StaticCatalog::load(&path).unwrap();
        let summaries: Vec<String> = catalog
            .known_requests()
            .iter()
            .map(RequestDescriptor::summary)
            .collect();
        assert_eq!(summaries, ["GET http://x/a", "POST http://x/b"]);
    }

    #[test]
    fn object_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        std::fs::write(&path, r#"{"method": "GET"}"#).unwrap();
        assert!(matches!(
            StaticCatalog::load(&path),
            Err(RelayError::Config { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_descriptors(&dir.path().join("nope.json")),
            Err(RelayError::Io(_))
        ));
    }
}
