//! Session persistence: storage snapshot + device profile, keyed by id.
//!
//! A session directory holds `profile.json` and `storage_state.json`.
//! Loading restores both so a returning session presents the same
//! fingerprint and the same cookies/web storage. Corrupt or missing files
//! fall back to a fresh session rather than failing the run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::profiles::{self, DeviceProfile};

/// One cookie in the storage snapshot. Mirrors the CDP cookie shape the
/// browser hands back, minus fields we never restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// Per-origin web storage entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredOrigin {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<(String, String)>,
}

/// Snapshot of cookies plus web storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<StoredOrigin>,
}

/// A loaded (or freshly created) session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub profile: DeviceProfile,
    pub seed: String,
    pub storage: StorageState,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    profile: DeviceProfile,
    seed: String,
}

/// Filesystem-backed session store under `sessions/{session_id}/`.
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    /// Load a session, or create and persist a fresh one when nothing
    /// usable is on disk. `region` steers profile generation for new
    /// sessions only; an existing profile is reused verbatim.
    pub async fn load_or_create(&self, session_id: &str, region: Option<&str>) -> Result<Session> {
        let dir = self.session_dir(session_id);
        let profile_path = dir.join("profile.json");
        let storage_path = dir.join("storage_state.json");

        if let Some((profile, seed)) = read_profile(&profile_path).await {
            let storage = read_storage(&storage_path).await.unwrap_or_default();
            debug!(session_id, "Restored persisted session");
            return Ok(Session {
                session_id: session_id.to_string(),
                profile,
                seed,
                storage,
            });
        }

        let session = Session {
            session_id: session_id.to_string(),
            profile: profiles::generate_profile(region),
            seed: profiles::generate_session_seed(),
            storage: StorageState::default(),
        };
        self.persist(&session).await?;
        debug!(session_id, "Created fresh session");
        Ok(session)
    }

    /// Persist profile and storage snapshot atomically (write-then-rename).
    pub async fn persist(&self, session: &Session) -> Result<()> {
        let dir = self.session_dir(&session.session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create session dir {}", dir.display()))?;

        let profile_file = ProfileFile {
            profile: session.profile.clone(),
            seed: session.seed.clone(),
        };
        write_atomic(
            &dir.join("profile.json"),
            &serde_json::to_vec_pretty(&profile_file)?,
        )
        .await?;
        write_atomic(
            &dir.join("storage_state.json"),
            &serde_json::to_vec_pretty(&session.storage)?,
        )
        .await?;
        Ok(())
    }

    /// Update only the storage snapshot of a persisted session.
    pub async fn save_storage(&self, session_id: &str, storage: &StorageState) -> Result<()> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        write_atomic(
            &dir.join("storage_state.json"),
            &serde_json::to_vec_pretty(storage)?,
        )
        .await
    }
}

async fn read_profile(path: &Path) -> Option<(DeviceProfile, String)> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str::<ProfileFile>(&raw) {
        Ok(file) => Some((file.profile, file.seed)),
        Err(e) => {
            warn!("Corrupt session profile {}, regenerating: {e}", path.display());
            None
        }
    }
}

async fn read_storage(path: &Path) -> Option<StorageState> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Corrupt storage state {}, starting empty: {e}", path.display());
            None
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to rename into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_id_restores_identical_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());

        let first = store.load_or_create("s1", None).await.expect("create");
        let second = store.load_or_create("s1", None).await.expect("reload");

        assert_eq!(first.profile, second.profile);
        assert_eq!(first.seed, second.seed);
    }

    #[tokio::test]
    async fn different_sessions_get_independent_seeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());

        let a = store.load_or_create("a", None).await.expect("create a");
        let b = store.load_or_create("b", None).await.expect("create b");
        assert_ne!(a.seed, b.seed);
    }

    #[tokio::test]
    async fn corrupt_profile_falls_back_to_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());
        let session_dir = dir.path().join("broken");
        tokio::fs::create_dir_all(&session_dir).await.expect("mkdir");
        tokio::fs::write(session_dir.join("profile.json"), "{not json")
            .await
            .expect("write corrupt");

        let session = store.load_or_create("broken", None).await.expect("fresh");
        assert_eq!(session.storage.cookies.len(), 0);
        // The fresh profile replaced the corrupt file.
        let reloaded = store.load_or_create("broken", None).await.expect("reload");
        assert_eq!(session.profile, reloaded.profile);
    }

    #[tokio::test]
    async fn storage_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());
        let mut session = store.load_or_create("cookies", None).await.expect("create");

        session.storage.cookies.push(StoredCookie {
            name: "sid".to_string(),
            value: "abc123".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            expires: None,
            secure: true,
            http_only: true,
        });
        store
            .save_storage("cookies", &session.storage)
            .await
            .expect("save");

        let reloaded = store.load_or_create("cookies", None).await.expect("reload");
        assert_eq!(reloaded.storage.cookies.len(), 1);
        assert_eq!(reloaded.storage.cookies[0].name, "sid");
    }
}
