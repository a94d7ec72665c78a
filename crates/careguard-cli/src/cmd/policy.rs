use crate::output::{print_json, print_table};
use anyhow::Context;
use careguard_core::classifier::RiskClassifier;
use careguard_core::config::{Config, ConfigWarning, WarnLevel};
use careguard_core::paths;
use careguard_core::policy::{PolicyDocument, PolicyStore};
use clap::Subcommand;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum PolicySubcommand {
    /// Validate config.yaml and policies.yaml
    Check,

    /// Print the policy catalogue
    Show,

    /// Show the risk tier and policy for an action type
    Classify {
        /// Action type, e.g. medication_change
        action_type: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: PolicySubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PolicySubcommand::Check => check(root, json),
        PolicySubcommand::Show => show(root, json),
        PolicySubcommand::Classify { action_type } => classify(root, &action_type, json),
    }
}

fn load_document(root: &Path) -> anyhow::Result<PolicyDocument> {
    let path = paths::policy_path(root);
    PolicyDocument::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let doc = load_document(root)?;
    let mut warnings: Vec<ConfigWarning> = config.validate();
    warnings.extend(doc.validate());

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!(
            "Configuration is valid: {} action types, fallback tier {}.",
            doc.actions.len(),
            doc.fallback.risk_tier
        );
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("policy check found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let doc = load_document(root)?;
    if json {
        return print_json(&doc);
    }

    let mut entries: Vec<_> = doc.actions.iter().collect();
    entries.sort_by(|(a_name, a), (b_name, b)| {
        b.risk_tier.cmp(&a.risk_tier).then_with(|| a_name.cmp(b_name))
    });
    let rows: Vec<Vec<String>> = entries
        .into_iter()
        .map(|(name, p)| {
            vec![
                name.clone(),
                p.risk_tier.to_string(),
                format!("{:.2}", p.confidence_threshold),
                p.approvals_required.to_string(),
                if p.auto_execute { "yes" } else { "no" }.to_string(),
                format!("{}s", p.timeout_seconds),
            ]
        })
        .collect();
    print_table(
        &["ACTION", "TIER", "THRESHOLD", "APPROVALS", "AUTO", "TIMEOUT"],
        rows,
    );
    println!("\nUnmapped action types: {} risk.", doc.fallback.risk_tier);
    Ok(())
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

fn classify(root: &Path, action_type: &str, json: bool) -> anyhow::Result<()> {
    let store = PolicyStore::new(load_document(root)?)?;
    let assessment = RiskClassifier::new(Arc::new(store)).assess(action_type)?;

    if json {
        return print_json(&assessment);
    }
    let p = &assessment.policy;
    println!("{}: {} risk", assessment.action_type, assessment.tier);
    if !assessment.mapped {
        println!("  (not in the catalogue; fallback policy applies)");
    }
    println!("  confidence threshold: {:.2}", p.confidence_threshold);
    println!("  auto execute:         {}", p.auto_execute);
    println!("  approvals required:   {}", p.approvals_required);
    println!("  escalation timeout:   {}s", p.timeout_seconds);
    println!(
        "  external calls:       {}s timeout, {} retries",
        p.service_timeout_seconds, p.max_retries
    );
    Ok(())
}
