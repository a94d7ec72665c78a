use anyhow::Context;
use careguard_core::{audit::SubjectSealer, config::Config, paths, policy::PolicyDocument};
use std::io::Write;
use std::path::Path;

/// Files that hold secrets or patient-linked data and must stay out of git.
const IGNORED: [&str; 3] = [
    paths::SUBJECT_KEY_FILE,
    paths::AUDIT_DB_FILE,
    paths::TICKETS_DB_FILE,
];

pub fn run(root: &Path, site: Option<&str>) -> anyhow::Result<()> {
    let site = match site {
        Some(s) => s.to_string(),
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "site".to_string()),
    };

    println!("Initializing careguard in: {}", root.display());

    // 1. Create .careguard/
    let dir = paths::careguard_dir(root);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    // 2. config.yaml
    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new(&site)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    // 3. policies.yaml with the default catalogue
    let policy_path = paths::policy_path(root);
    if policy_path.exists() {
        println!("  exists:  {}", paths::POLICY_FILE);
    } else {
        PolicyDocument::default()
            .save(&policy_path)
            .context("failed to write policies.yaml")?;
        println!("  created: {}", paths::POLICY_FILE);
    }

    // 4. Subject sealing key. Never regenerated: audit entries sealed with
    // the old key would stop matching patient queries.
    if SubjectSealer::create_key(root).context("failed to write subject.key")? {
        println!("  created: {}", paths::SUBJECT_KEY_FILE);
    } else {
        println!("  exists:  {}", paths::SUBJECT_KEY_FILE);
    }

    // 5. .gitignore
    ignore(root, &IGNORED).context("failed to update .gitignore")?;

    println!("\ncareguard initialized for site '{site}'.");
    println!("Next: careguard policy check && careguard serve");
    Ok(())
}

/// Append to `root/.gitignore` the entries it lacks, as exact lines.
fn ignore(root: &Path, entries: &[&str]) -> std::io::Result<()> {
    let path = root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let missing: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|e| !existing.lines().any(|l| l.trim() == *e))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(f)?;
    }
    for entry in missing {
        writeln!(f, "{entry}")?;
    }
    Ok(())
}
