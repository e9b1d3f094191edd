//! Backup-set metadata recovered from the MTF header region.

/// What kind of backup a set holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum BackupType {
    #[default]
    Unknown,
    Full,
    Differential,
    Log,
}

/// Metadata of one backup set, best-effort.
///
/// Fields the heuristic parse cannot recover stay at their defaults; in
/// particular `is_tde` and `is_encrypted` remain `false` unless explicit
/// metadata was found.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BackupSetInfo {
    pub position: i32,
    pub database_name: String,
    pub server_name: String,
    pub backup_type: BackupType,
    pub compatibility_level: i32,
    pub is_compressed: bool,
    pub is_encrypted: bool,
    pub is_tde: bool,
    pub backup_size: u64,
    pub compressed_size: u64,
    pub software_major: i32,
    pub software_minor: i32,
}

/// Everything the framer recovered from one backup's header region.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BackupInfo {
    /// Path of the first stripe the headers were read from.
    pub file_path: String,
    pub backup_sets: Vec<BackupSetInfo>,
}

impl BackupInfo {
    /// Whether any set reports Transparent Data Encryption.
    #[must_use]
    pub fn is_tde(&self) -> bool {
        self.backup_sets.iter().any(|s| s.is_tde)
    }

    /// Whether any set reports backup-level encryption.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.backup_sets.iter().any(|s| s.is_encrypted)
    }

    /// Whether any set reports stream compression.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.backup_sets.iter().any(|s| s.is_compressed)
    }

    /// Select a set by position, or the first one.
    #[must_use]
    pub fn select_set(&self, position: Option<i32>) -> Option<&BackupSetInfo> {
        match position {
            Some(p) => self.backup_sets.iter().find(|s| s.position == p),
            None => self.backup_sets.first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_aggregate_over_sets() {
        let mut info = BackupInfo::default();
        assert!(!info.is_tde());
        assert!(!info.is_encrypted());

        info.backup_sets.push(BackupSetInfo {
            position: 1,
            ..BackupSetInfo::default()
        });
        info.backup_sets.push(BackupSetInfo {
            position: 2,
            is_tde: true,
            is_compressed: true,
            ..BackupSetInfo::default()
        });

        assert!(info.is_tde());
        assert!(!info.is_encrypted());
        assert!(info.is_compressed());
    }

    #[test]
    fn set_selection() {
        let mut info = BackupInfo::default();
        info.backup_sets.push(BackupSetInfo {
            position: 1,
            database_name: "Alpha".to_owned(),
            ..BackupSetInfo::default()
        });
        info.backup_sets.push(BackupSetInfo {
            position: 2,
            database_name: "Beta".to_owned(),
            ..BackupSetInfo::default()
        });

        assert_eq!(info.select_set(None).unwrap().database_name, "Alpha");
        assert_eq!(info.select_set(Some(2)).unwrap().database_name, "Beta");
        assert!(info.select_set(Some(9)).is_none());
    }
}
