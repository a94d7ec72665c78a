use crate::client::Client;
use crate::output::{cell, print_json};
use std::path::Path;
use uuid::Uuid;

pub fn run(
    root: &Path,
    server: Option<&str>,
    action_id: Uuid,
    history: bool,
    json: bool,
) -> anyhow::Result<()> {
    let client = Client::resolve(root, server)?;
    let status = client.get(&format!("/api/actions/{action_id}"), &[])?;
    let entries = if history {
        Some(client.get(&format!("/api/actions/{action_id}/audit"), &[])?)
    } else {
        None
    };

    if json {
        return match entries {
            Some(e) => print_json(&serde_json::json!({ "status": status, "history": e })),
            None => print_json(&status),
        };
    }

    println!("action:      {}", cell(&status["action_id"]));
    println!("type:        {}", cell(&status["action_type"]));
    println!("agent:       {}", cell(&status["agent_id"]));
    println!("risk tier:   {}", cell(&status["risk_tier"]));
    println!("disposition: {}", cell(&status["disposition"]));
    println!("ticket:      {}", cell(&status["ticket_id"]));
    println!("executed:    {}", cell(&status["executed"]));
    println!("rationale:   {}", cell(&status["rationale"]));

    if let Some(entries) = entries {
        println!("\nhistory:");
        for e in entries.as_array().into_iter().flatten() {
            println!(
                "  {}  {:<20} {:<26} {}",
                cell(&e["timestamp"]),
                cell(&e["disposition"]),
                cell(&e["rule"]),
                cell(&e["rationale"])
            );
        }
    }
    Ok(())
}
