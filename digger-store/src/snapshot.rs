//! Optional file copy of the registry, keyed by origin.

use std::fs;
use std::path::Path;

use thiserror::Error;

use digger_types::Registry;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Write `registry` as pretty JSON, replacing any previous snapshot at `path`.
pub fn save(path: impl AsRef<Path>, registry: &Registry) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(registry).map_err(|e| SnapshotError::Parse(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(|e| SnapshotError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| SnapshotError::Io(e.to_string()))
}

/// Read a snapshot; a missing file is an empty registry.
pub fn load(path: impl AsRef<Path>) -> Result<Registry, SnapshotError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Registry::new());
    }
    let bytes = fs::read(path).map_err(|e| SnapshotError::Io(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchemaAggregator;
    use digger_types::{OperationRecord, OperationType};
    use serde_json::json;

    #[test]
    fn snapshot_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");

        let agg = SchemaAggregator::default();
        let record = OperationRecord {
            operation_name: "Me".into(),
            operation_type: OperationType::Query,
            query_text: "query Me { me { id } }".into(),
            variables: Default::default(),
        };
        agg.record("https://a.test", &record, Some(&json!({"data": {"me": {"id": "1"}}})));
        save(&path, &agg.registry()).unwrap();

        let restored = SchemaAggregator::default();
        restored.restore(load(&path).unwrap());
        assert_eq!(restored.registry(), agg.registry());
        assert_eq!(restored.get_schema("https://a.test").queries["Me"].count, 1);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path().join("absent.json")).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(load(&path), Err(SnapshotError::Parse(_))));
    }
}
