//! Blocking HTTP client for a running `careguard serve`.

use anyhow::{anyhow, bail, Context};
use careguard_core::config::Config;
use careguard_server::access::{ROLE_HEADER, USER_HEADER};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Who the CLI reads patient data as. Unset means the server records
/// `unknown`.
pub const USER_ENV: &str = "CAREGUARD_USER";
pub const ROLE_ENV: &str = "CAREGUARD_ROLE";

pub struct Client {
    base: String,
    agent: ureq::Agent,
    identity: Vec<(&'static str, String)>,
}

impl Client {
    pub fn new(base: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .build();
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            agent,
            identity: Vec::new(),
        }
    }

    pub fn with_identity(mut self, user: Option<String>, role: Option<String>) -> Self {
        self.identity = [(USER_HEADER, user), (ROLE_HEADER, role)]
            .into_iter()
            .filter_map(|(h, v)| v.filter(|v| !v.trim().is_empty()).map(|v| (h, v)))
            .collect();
        self
    }

    /// Use `explicit` when given, else the port from the project config.
    /// Identity comes from `CAREGUARD_USER` and `CAREGUARD_ROLE`.
    pub fn resolve(root: &Path, explicit: Option<&str>) -> anyhow::Result<Self> {
        let client = match explicit {
            Some(url) => Self::new(url),
            None => {
                let config = Config::load(root).context("failed to load config")?;
                Self::new(format!("http://localhost:{}", config.server.port))
            }
        };
        Ok(client.with_identity(std::env::var(USER_ENV).ok(), std::env::var(ROLE_ENV).ok()))
    }

    fn identify(&self, mut req: ureq::Request) -> ureq::Request {
        for (header, value) in &self.identity {
            req = req.set(header, value);
        }
        req
    }

    pub fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
        let mut req = self.identify(self.agent.get(&format!("{}{path}", self.base)));
        for (k, v) in query {
            req = req.query(k, v);
        }
        self.finish(req.call())
    }

    pub fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let req = self
            .identify(self.agent.post(&format!("{}{path}", self.base)))
            .set("content-type", "application/json");
        self.finish(req.send_string(&body.to_string()))
    }

    fn finish(&self, result: Result<ureq::Response, ureq::Error>) -> anyhow::Result<Value> {
        match result {
            Ok(resp) => {
                let text = resp.into_string().context("failed to read response")?;
                serde_json::from_str(&text).context("server returned invalid JSON")
            }
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                let message = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v["error"].as_str().map(str::to_string))
                    .unwrap_or(text);
                bail!("server returned {code}: {message}")
            }
            Err(ureq::Error::Transport(e)) => Err(anyhow!(
                "cannot reach careguard server at {}: {e}",
                self.base
            )),
        }
    }
}
