use crate::client::Client;
use crate::output::{cell, print_json, print_table};
use clap::Subcommand;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum TicketsSubcommand {
    /// List open tickets
    List {
        /// Only tickets this role may approve
        #[arg(long)]
        role: Option<String>,
    },

    /// Show one ticket
    Show { id: Uuid },

    /// Approve or deny a ticket
    Resolve {
        id: Uuid,
        /// Reviewer id
        #[arg(long)]
        approver: String,
        /// Reviewer role, checked against the role matrix
        #[arg(long)]
        role: String,
        /// approve or deny
        #[arg(long)]
        decision: String,
        /// Reason for the decision
        #[arg(long)]
        reason: Option<String>,
        /// Change made to the action before approving (repeatable)
        #[arg(long = "modify", value_name = "TEXT")]
        modifications: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    server: Option<&str>,
    subcmd: TicketsSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let client = Client::resolve(root, server)?;
    match subcmd {
        TicketsSubcommand::List { role } => list(&client, role, json),
        TicketsSubcommand::Show { id } => show(&client, id, json),
        TicketsSubcommand::Resolve {
            id,
            approver,
            role,
            decision,
            reason,
            modifications,
        } => {
            let decision: careguard_core::types::Decision = decision.parse()?;
            let body = serde_json::json!({
                "approver_id": approver,
                "role": role,
                "decision": decision,
                "reason": reason,
                "modifications": modifications,
            });
            resolve(&client, id, &body, json)
        }
    }
}

fn list(client: &Client, role: Option<String>, json: bool) -> anyhow::Result<()> {
    let query: Vec<(&str, String)> = role.into_iter().map(|r| ("role", r)).collect();
    let tickets = client.get("/api/tickets", &query)?;
    if json {
        return print_json(&tickets);
    }
    let rows: Vec<Vec<String>> = tickets
        .as_array()
        .into_iter()
        .flatten()
        .map(|t| {
            vec![
                cell(&t["id"]),
                cell(&t["action"]["action_type"]),
                cell(&t["risk_tier"]),
                format!(
                    "{}/{}",
                    t["approvals"].as_array().map_or(0, Vec::len),
                    cell(&t["required_approvals"])
                ),
                cell(&t["expires_at"]),
            ]
        })
        .collect();
    if rows.is_empty() {
        println!("No open tickets.");
        return Ok(());
    }
    print_table(&["TICKET", "ACTION", "TIER", "APPROVALS", "EXPIRES"], rows);
    Ok(())
}

fn show(client: &Client, id: Uuid, json: bool) -> anyhow::Result<()> {
    let t = client.get(&format!("/api/tickets/{id}"), &[])?;
    if json {
        return print_json(&t);
    }
    println!("ticket:    {}", cell(&t["id"]));
    println!("status:    {}", cell(&t["status"]));
    println!("action:    {} ({})", cell(&t["action"]["id"]), cell(&t["action"]["action_type"]));
    println!("risk tier: {}", cell(&t["risk_tier"]));
    println!("opened as: {}", cell(&t["opened_as"]));
    println!("reason:    {}", cell(&t["rationale"]));
    println!("expires:   {}", cell(&t["expires_at"]));
    println!(
        "approvals: {}/{}",
        t["approvals"].as_array().map_or(0, Vec::len),
        cell(&t["required_approvals"])
    );
    for a in t["approvals"].as_array().into_iter().flatten() {
        println!("  - {} ({}) at {}", cell(&a["approver_id"]), cell(&a["role"]), cell(&a["at"]));
    }
    if !t["denial"].is_null() {
        println!(
            "denied by: {} ({})",
            cell(&t["denial"]["approver_id"]),
            cell(&t["denial"]["reason"])
        );
    }
    Ok(())
}

fn resolve(client: &Client, id: Uuid, body: &serde_json::Value, json: bool) -> anyhow::Result<()> {
    let res = client.post(&format!("/api/tickets/{id}/resolve"), body)?;
    if json {
        return print_json(&res);
    }
    println!(
        "ticket {}: {} (action {})",
        cell(&res["ticket"]["id"]),
        cell(&res["ticket"]["status"]),
        cell(&res["disposition"])
    );
    if res["executed"] == true {
        println!("  executed");
    }
    if !res["escalation_ticket"].is_null() {
        println!("  execution failed; escalated as {}", cell(&res["escalation_ticket"]));
    }
    Ok(())
}
