use crate::client::Client;
use crate::output::{cell, print_json, print_table};
use clap::{Args, Subcommand};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Args, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub agent: Option<String>,
    /// Patient id; sealed server-side before matching
    #[arg(long)]
    pub patient: Option<String>,
    /// low, medium, high or critical
    #[arg(long)]
    pub tier: Option<String>,
    #[arg(long)]
    pub action: Option<String>,
    /// RFC 3339 timestamp, inclusive
    #[arg(long)]
    pub since: Option<String>,
    /// RFC 3339 timestamp, inclusive
    #[arg(long)]
    pub until: Option<String>,
}

impl FilterArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        [
            ("agent_id", &self.agent),
            ("patient_id", &self.patient),
            ("risk_tier", &self.tier),
            ("action_id", &self.action),
            ("since", &self.since),
            ("until", &self.until),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k, v)))
        .collect()
    }
}

#[derive(Subcommand)]
pub enum AuditSubcommand {
    /// List audit entries, oldest first
    Query {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Aggregate counts by tier, disposition and agent
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Who read or wrote patient data, oldest first
    Access {
        #[arg(long)]
        user: Option<String>,
        /// Patient id; sealed server-side before matching
        #[arg(long)]
        patient: Option<String>,
        /// RFC 3339 timestamp, inclusive
        #[arg(long)]
        since: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    server: Option<&str>,
    subcmd: AuditSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let client = Client::resolve(root, server)?;
    match subcmd {
        AuditSubcommand::Query { filter, limit } => {
            let mut query = filter.query();
            query.push(("limit", limit.to_string()));
            let result = client.get("/api/audit", &query)?;
            if json {
                return print_json(&result);
            }
            let rows: Vec<Vec<String>> = result["entries"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|e| {
                    vec![
                        cell(&e["log_id"]),
                        cell(&e["timestamp"]),
                        cell(&e["action_type"]),
                        cell(&e["agent_id"]),
                        cell(&e["risk_tier"]),
                        cell(&e["disposition"]),
                        cell(&e["rule"]),
                    ]
                })
                .collect();
            if rows.is_empty() {
                println!("No matching audit entries.");
                return Ok(());
            }
            print_table(
                &["LOG", "TIME", "ACTION", "AGENT", "TIER", "DISPOSITION", "RULE"],
                rows,
            );
            Ok(())
        }
        AuditSubcommand::Stats { filter } => {
            let stats = client.get("/api/audit/stats", &filter.query())?;
            if json {
                return print_json(&stats);
            }
            println!("entries:         {}", cell(&stats["total_entries"]));
            println!("actions:         {}", cell(&stats["distinct_actions"]));
            println!("human overrides: {}", cell(&stats["human_overrides"]));
            for (title, key) in [
                ("by risk tier", "by_risk_tier"),
                ("by disposition", "by_disposition"),
                ("by agent", "by_agent"),
            ] {
                println!("\n{title}:");
                for (k, v) in stats[key].as_object().into_iter().flatten() {
                    println!("  {k:<24} {v}");
                }
            }
            Ok(())
        }
        AuditSubcommand::Access {
            user,
            patient,
            since,
        } => {
            let query: Vec<(&str, String)> =
                [("user_id", user), ("patient_id", patient), ("since", since)]
                    .into_iter()
                    .filter_map(|(k, v)| v.map(|v| (k, v)))
                    .collect();
            let records = client.get("/api/audit/access", &query)?;
            if json {
                return print_json(&records);
            }
            let rows: Vec<Vec<String>> = records
                .as_array()
                .into_iter()
                .flatten()
                .map(|r| {
                    let outcome = if r["success"] == true { "ok" } else { "failed" };
                    vec![
                        cell(&r["timestamp"]),
                        cell(&r["user_id"]),
                        cell(&r["user_role"]),
                        cell(&r["kind"]),
                        cell(&r["resource"]),
                        outcome.to_string(),
                    ]
                })
                .collect();
            if rows.is_empty() {
                println!("No matching access records.");
                return Ok(());
            }
            print_table(&["TIME", "USER", "ROLE", "KIND", "RESOURCE", "OUTCOME"], rows);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_query_skips_unset_fields() {
        let f = FilterArgs {
            agent: Some("care-agent".into()),
            tier: Some("high".into()),
            ..FilterArgs::default()
        };
        assert_eq!(
            f.query(),
            vec![
                ("agent_id", "care-agent".to_string()),
                ("risk_tier", "high".to_string())
            ]
        );
    }
}
