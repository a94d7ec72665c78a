use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CAREGUARD_DIR: &str = ".careguard";

pub const CONFIG_FILE: &str = ".careguard/config.yaml";
pub const POLICY_FILE: &str = ".careguard/policies.yaml";
pub const SUBJECT_KEY_FILE: &str = ".careguard/subject.key";
pub const AUDIT_DB_FILE: &str = ".careguard/audit.redb";
pub const TICKETS_DB_FILE: &str = ".careguard/tickets.redb";

/// Environment variable that overrides the subject key file.
pub const SUBJECT_KEY_ENV: &str = "CAREGUARD_SUBJECT_KEY";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn careguard_dir(root: &Path) -> PathBuf {
    root.join(CAREGUARD_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn policy_path(root: &Path) -> PathBuf {
    root.join(POLICY_FILE)
}

pub fn subject_key_path(root: &Path) -> PathBuf {
    root.join(SUBJECT_KEY_FILE)
}

pub fn audit_db_path(root: &Path) -> PathBuf {
    root.join(AUDIT_DB_FILE)
}

pub fn tickets_db_path(root: &Path) -> PathBuf {
    root.join(TICKETS_DB_FILE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
