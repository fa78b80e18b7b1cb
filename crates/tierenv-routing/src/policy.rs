//! Placement policy for files the catalog has never seen
//!
//! Engine-created files are tagged with a class explicitly. Files found by the
//! fallback probe have no tag, so their class is inferred from the name.

use tierenv_core::{BackendKind, FileId, PlacementClass};

/// Name-based classification plus the fallback probe order
#[derive(Debug, Clone)]
pub struct PlacementPolicy {
    /// Name prefixes of write-ahead log files
    pub wal_prefixes: Vec<String>,
    /// Name suffixes of write-ahead log files
    pub wal_suffixes: Vec<String>,
    /// Name prefixes of table data files
    pub data_prefixes: Vec<String>,
    /// Name suffixes of table data files
    pub data_suffixes: Vec<String>,
    /// Backend tried first by the fallback probe
    pub probe_first: BackendKind,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            wal_prefixes: vec!["wal".to_string()],
            wal_suffixes: vec![".log".to_string()],
            data_prefixes: vec!["sst".to_string()],
            data_suffixes: vec![".sst".to_string()],
            probe_first: BackendKind::Conventional,
        }
    }
}

impl PlacementPolicy {
    /// Infer a placement class from a file name
    pub fn classify(&self, id: &FileId) -> PlacementClass {
        let name = base_name(id.as_str());
        let matches = |prefixes: &[String], suffixes: &[String]| {
            prefixes.iter().any(|p| name.starts_with(p.as_str()))
                || suffixes.iter().any(|s| name.ends_with(s.as_str()))
        };

        if matches(&self.wal_prefixes, &self.wal_suffixes) {
            PlacementClass::Wal
        } else if matches(&self.data_prefixes, &self.data_suffixes) {
            PlacementClass::Data
        } else {
            PlacementClass::Other
        }
    }

    /// Backends in fallback probe order
    pub fn probe_order(&self) -> [BackendKind; 2] {
        [self.probe_first, self.probe_first.other()]
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let policy = PlacementPolicy::default();
        assert_eq!(policy.classify(&"wal-01".into()), PlacementClass::Wal);
        assert_eq!(policy.classify(&"000042.log".into()), PlacementClass::Wal);
        assert_eq!(policy.classify(&"sst-001".into()), PlacementClass::Data);
        assert_eq!(policy.classify(&"db/000007.sst".into()), PlacementClass::Data);
        assert_eq!(policy.classify(&"MANIFEST-000001".into()), PlacementClass::Other);
        assert_eq!(policy.classify(&"CURRENT".into()), PlacementClass::Other);
    }

    #[test]
    fn test_probe_order() {
        let policy = PlacementPolicy::default();
        assert_eq!(
            policy.probe_order(),
            [BackendKind::Conventional, BackendKind::Userspace]
        );
    }
}
