//! Canonical paths under the myday home.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! | Path | Owner | Purpose |
//! |------|-------|---------|
//! | `entries.json` | `LocalEntryStore` | Entry records |
//! | `state/upload_items.json` | `UploadQueue` | Resident upload items |
//! | `state/sync_cursor.json` | `SyncService` | Last successful sync |

use std::path::{Path, PathBuf};

/// Entry document file name
pub const ENTRIES_FILE: &str = "entries.json";

/// Key/value state directory name
pub const STATE_DIR: &str = "state";

/// Entry store path under a home (`<home>/entries.json`)
pub fn entries_file_in(home: &Path) -> PathBuf {
    home.join(ENTRIES_FILE)
}

/// Key/value state directory under a home (`<home>/state/`)
pub fn state_dir_in(home: &Path) -> PathBuf {
    home.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_home() {
        let home = PathBuf::from("/tmp/myday-home");

        assert_eq!(entries_file_in(&home), PathBuf::from("/tmp/myday-home/entries.json"));
        assert_eq!(state_dir_in(&home), PathBuf::from("/tmp/myday-home/state"));
    }
}
