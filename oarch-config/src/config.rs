//! `/etc/archivestore.conf` reader: simple `option=value` lines.
//!
//! Grounded on `original_source/include/cfgparams.h` for the getter surface;
//! unlike the original, missing/unrecognised values never panic — callers
//! get documented defaults.

use std::collections::HashMap;
use std::path::Path;

use oarch_types::ArchOpType;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/archivestore.conf";

const DEFAULT_ROTATION_SIZE: u64 = 100 * (1 << 20);
const DEFAULT_FREE_SPACE: u64 = 500 * (1 << 20);

#[derive(Debug, Clone, Default)]
pub struct ArchiveStoreConfig {
    values: HashMap<String, String>,
}

impl ArchiveStoreConfig {
    /// Parses `option=value` lines. Blank lines and lines starting with `#`
    /// are ignored. Unknown keys are kept verbatim (forward-compatible);
    /// nothing here validates against a fixed schema.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            } else {
                log::warn!("ignoring malformed config line: {line:?}");
            }
        }
        Self { values }
    }

    /// Loads from `path`. A missing file is not an error; defaults apply.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn load_default() -> anyhow::Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn log_dir(&self) -> Option<&str> {
        self.values.get("log_dir").map(String::as_str)
    }

    pub fn log_prefix(&self) -> &str {
        self.values.get("log_prefix").map(String::as_str).unwrap_or("archivestore")
    }

    pub fn rotation_size(&self) -> u64 {
        self.get_u64("rotation_size").unwrap_or(DEFAULT_ROTATION_SIZE)
    }

    pub fn free_space(&self) -> u64 {
        self.get_u64("free_space").unwrap_or(DEFAULT_FREE_SPACE)
    }

    pub fn log_level(&self) -> u32 {
        self.get_u64("log_level").unwrap_or(0).min(5) as u32
    }

    pub fn create_fast_threads(&self) -> bool {
        self.get_bool("create_fast_threads").unwrap_or(true)
    }

    pub fn create_slow_threads(&self) -> bool {
        self.get_bool("create_slow_threads").unwrap_or(false)
    }

    /// `expand_val` and `flush_interval` are parsed but, per the Open
    /// Question decision in DESIGN.md, no component in this repo consumes
    /// them either; they are exposed so a future logger/pool config can,
    /// and their absence is tolerated.
    pub fn expand_val(&self) -> Option<i64> {
        self.get_i64("expand_val")
    }

    pub fn flush_interval(&self) -> Option<i64> {
        self.get_i64("flush_interval")
    }

    /// `get_num_work_items` only recognises `{Backup, Restore, Archive}`;
    /// anything else, and any recognised key left unset, returns 0 — treated
    /// by callers as "disabled" per the Open Question decision recorded in
    /// DESIGN.md, not as "unlimited".
    pub fn get_num_work_items(&self, op: ArchOpType) -> u64 {
        let key = match op {
            ArchOpType::Backup => "work_items_backup",
            ArchOpType::Restore => "work_items_restore",
            ArchOpType::Archive => "work_items_archive",
            ArchOpType::Scan | ArchOpType::Stub | ArchOpType::Other => return 0,
        };
        self.get_u64(key).unwrap_or(0)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(|v| v.parse().ok())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.parse().ok())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| match v.as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = ArchiveStoreConfig::load(Path::new("/nonexistent/archivestore.conf")).unwrap();
        assert_eq!(cfg.rotation_size(), DEFAULT_ROTATION_SIZE);
        assert_eq!(cfg.free_space(), DEFAULT_FREE_SPACE);
        assert_eq!(cfg.log_level(), 0);
    }

    #[test]
    fn parses_and_overrides_defaults() {
        let cfg = ArchiveStoreConfig::parse(
            "log_dir=/var/log/archivestore\n\
             rotation_size=2097152\n\
             log_level=3\n\
             # a comment\n\
             \n\
             expand_val=7\n",
        );
        assert_eq!(cfg.log_dir(), Some("/var/log/archivestore"));
        assert_eq!(cfg.rotation_size(), 2097152);
        assert_eq!(cfg.log_level(), 3);
        assert_eq!(cfg.expand_val(), Some(7));
        assert_eq!(cfg.flush_interval(), None);
    }

    #[test]
    fn log_level_is_clamped_to_five() {
        let cfg = ArchiveStoreConfig::parse("log_level=9\n");
        assert_eq!(cfg.log_level(), 5);
    }

    #[test]
    fn unrecognised_op_kinds_have_no_work_item_limit() {
        let cfg = ArchiveStoreConfig::parse("work_items_backup=4\n");
        assert_eq!(cfg.get_num_work_items(ArchOpType::Backup), 4);
        assert_eq!(cfg.get_num_work_items(ArchOpType::Scan), 0);
    }
}
