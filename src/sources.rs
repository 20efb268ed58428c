use crate::error::{BridgeError, Result};
use crate::types::SourceId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Music source names by source id, as reported by `browse/get_music_sources`
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    names: BTreeMap<SourceId, String>,
}

/// Catalog shared by every device of a system
pub type SharedSourceCatalog = Arc<RwLock<SourceCatalog>>;

#[derive(Debug, Deserialize)]
struct SourceEntry {
    sid: SourceId,
    name: String,
}

impl SourceCatalog {
    /// Build a catalog from a `get_music_sources` payload
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let entries: Vec<SourceEntry> = serde_json::from_value(payload.clone())?;
        if entries.is_empty() {
            return Err(BridgeError::InvalidResponse("Empty music source list".to_string()));
        }

        Ok(Self {
            names: entries.into_iter().map(|e| (e.sid, e.name)).collect(),
        })
    }

    pub fn name(&self, sid: SourceId) -> Option<&str> {
        self.names.get(&sid).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_from_payload() {
        let catalog = SourceCatalog::from_payload(&json!([
            {"name": "Pandora", "image_url": "", "type": "music_service", "sid": 1},
            {"name": "TuneIn", "image_url": "", "type": "music_service", "sid": 3},
            {"name": "AUX Input", "image_url": "", "type": "heos_service", "sid": 1027}
        ]))
        .unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.name(3), Some("TuneIn"));
        assert_eq!(catalog.name(99), None);
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(SourceCatalog::from_payload(&json!([])).is_err());
        assert!(SourceCatalog::from_payload(&json!({"sid": 1})).is_err());
    }
}
