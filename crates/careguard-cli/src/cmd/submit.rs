use crate::client::Client;
use crate::output::{cell, print_json};
use clap::Args;
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

#[derive(Args)]
pub struct SubmitArgs {
    /// Action type, e.g. medication_change
    pub action_type: String,

    /// Requesting agent id
    #[arg(long)]
    pub agent: String,

    /// Role the agent acts under
    #[arg(long, default_value = "domain_agent")]
    pub role: String,

    /// Patient identifier (sealed before it is stored)
    #[arg(long)]
    pub subject: String,

    /// Agent confidence in [0.0, 1.0]
    #[arg(long)]
    pub confidence: f64,

    /// Why the agent proposes this action
    #[arg(long)]
    pub rationale: Option<String>,

    /// Action parameter as key=value; value is parsed as JSON when possible
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Reuse an action id (resubmission is idempotent)
    #[arg(long)]
    pub id: Option<Uuid>,
}

pub fn run(root: &Path, server: Option<&str>, args: SubmitArgs, json: bool) -> anyhow::Result<()> {
    let parameters = parse_params(&args.params)?;
    let mut body = serde_json::json!({
        "action_type": args.action_type,
        "agent_id": args.agent,
        "role_id": args.role,
        "subject_id": args.subject,
        "confidence": args.confidence,
        "parameters": parameters,
    });
    if let Some(r) = args.rationale {
        body["rationale"] = Value::String(r);
    }
    if let Some(id) = args.id {
        body["id"] = Value::String(id.to_string());
    }

    let result = Client::resolve(root, server)?.post("/api/actions", &body)?;
    if json {
        return print_json(&result);
    }

    println!(
        "{} {} ({} risk){}",
        cell(&result["action_id"]),
        cell(&result["disposition"]),
        cell(&result["risk_tier"]),
        if result["duplicate"] == true { " [duplicate]" } else { "" }
    );
    println!("  {}", cell(&result["rationale"]));
    if !result["ticket_id"].is_null() {
        println!("  ticket: {}", cell(&result["ticket_id"]));
    }
    Ok(())
}

fn parse_params(raw: &[String]) -> anyhow::Result<Value> {
    let mut map = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            anyhow::bail!("invalid --param '{item}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid --param '{item}': empty key");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_parse_json_values_and_fall_back_to_strings() {
        let v = parse_params(&[
            "dose_mg=20".to_string(),
            "drug=lisinopril".to_string(),
            "prn=true".to_string(),
        ])
        .unwrap();
        assert_eq!(v, json!({ "dose_mg": 20, "drug": "lisinopril", "prn": true }));
    }

    #[test]
    fn params_without_equals_are_rejected() {
        assert!(parse_params(&["dose".to_string()]).is_err());
        assert!(parse_params(&["=5".to_string()]).is_err());
    }
}
