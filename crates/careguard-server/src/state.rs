use careguard_core::router::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(root: PathBuf, orchestrator: Arc<Orchestrator>) -> Self {
        Self { root, orchestrator }
    }

    /// Open the orchestrator for the project under `root`.
    pub fn open(root: PathBuf) -> careguard_core::Result<Self> {
        let orchestrator = Arc::new(Orchestrator::open(&root)?);
        Ok(Self::new(root, orchestrator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use careguard_core::GuardError;

    #[test]
    fn open_requires_initialized_project() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = AppState::open(dir.path().to_path_buf()).err().unwrap();
        assert!(matches!(err, GuardError::NotInitialized));
    }
}
