//! Scenario state for registry authentication behavioural tests.

use std::sync::Arc;

use camino::Utf8PathBuf;
use podwire::registry::{AuthScheme, FileCredentialStore};
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistryMode {
    Bearer,
    Basic,
}

#[derive(Debug, Clone)]
pub(crate) enum LoginResult {
    Succeeded(AuthScheme),
    Failed { message: String },
}

#[derive(Default, ScenarioState)]
pub(crate) struct RegistryState {
    pub(crate) mode: Slot<RegistryMode>,
    /// Keeps the credential directory alive for the whole scenario.
    pub(crate) config_dir: Slot<Arc<TempDir>>,
    /// Key the scenario's credentials are stored under.
    pub(crate) registry_key: Slot<String>,
    pub(crate) login: Slot<LoginResult>,
    pub(crate) headers: Slot<Vec<Option<String>>>,
    pub(crate) token_requests: Slot<usize>,
}

impl RegistryState {
    /// Returns a store rooted in the scenario's temporary directory.
    pub(crate) fn credential_store(&self) -> Result<FileCredentialStore, String> {
        let dir = self
            .config_dir
            .get()
            .ok_or_else(|| String::from("credential directory should be created"))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| format!("temporary directory is not UTF-8: {}", path.display()))?;
        Ok(FileCredentialStore::new(path))
    }
}

#[fixture]
pub(crate) fn registry_state() -> RegistryState {
    let state = RegistryState::default();
    if let Ok(dir) = tempfile::tempdir() {
        state.config_dir.set(Arc::new(dir));
    }
    state
}
