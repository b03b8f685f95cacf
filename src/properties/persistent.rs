//! Durable mirror of `persist.*` properties.
//!
//! One file per key under the persist directory, each replaced through a
//! temp file + `rename` so readers never observe a torn value. Writes only
//! happen after the boot-time load pass, otherwise stale defaults would
//! overwrite what the user persisted.

use std::path::PathBuf;

use log::{error, warn};

#[derive(Debug)]
pub struct PersistentStore {
    dir: PathBuf,
}

const TMP_PREFIX: &str = ".tmp.";

impl PersistentStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Durably record `name=value`. Property names contain no `/`, so the
    /// name doubles as the file name.
    pub fn write(&self, name: &str, value: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{TMP_PREFIX}{name}"));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, self.dir.join(name))
    }

    /// Load every persisted property. Stray temp files from an interrupted
    /// write are discarded, non-`persist.` names are ignored.
    pub fn load(&self) -> Vec<(String, String)> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read persistent property dir {:?}: {e}", self.dir);
                return Vec::new();
            }
        };

        let mut properties = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TMP_PREFIX) {
                let _ = std::fs::remove_file(entry.path());
                continue;
            }
            if !name.starts_with("persist.") {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(value) => properties.push((name, value)),
                Err(e) => error!("Could not read persistent property '{name}': {e}"),
            }
        }
        properties.sort();
        properties
    }
}
