// Remote profile mirror
// A secondary store holding one JSON document. Pulled once at first connect
// (remote wins per key), pushed in full after every local mutation. All
// failures are logged and swallowed; the mirror never blocks a local write.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};

use super::models::MemoryProfile;
use super::store::MemoryStore;

#[async_trait]
pub trait RemoteMirror: Send + Sync {
    /// Fetch the full remote profile; None when nothing was ever pushed
    async fn pull(&self) -> Result<Option<MemoryProfile>>;

    /// Replace the remote profile wholesale
    async fn push(&self, profile: &MemoryProfile) -> Result<()>;
}

/// Mirror backed by a single JSON document at a fixed URL
pub struct HttpMirror {
    client: reqwest::Client,
    url: String,
}

impl HttpMirror {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl RemoteMirror for HttpMirror {
    async fn pull(&self) -> Result<Option<MemoryProfile>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Mirror GET failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let profile = response
            .error_for_status()
            .context("Mirror GET returned error status")?
            .json::<MemoryProfile>()
            .await
            .context("Mirror returned invalid JSON")?;

        Ok(Some(profile))
    }

    async fn push(&self, profile: &MemoryProfile) -> Result<()> {
        self.client
            .put(&self.url)
            .json(profile)
            .send()
            .await
            .context("Mirror PUT failed")?
            .error_for_status()
            .context("Mirror PUT returned error status")?;
        Ok(())
    }
}

/// Pull the remote profile and merge it into the local store, remote
/// winning per key. Returns how many keys were applied; any failure is
/// logged and counts as zero.
pub async fn merge_remote_into_local(store: &MemoryStore, mirror: &dyn RemoteMirror) -> usize {
    let remote = match mirror.pull().await {
        Ok(Some(remote)) => remote,
        Ok(None) => {
            info!("No remote profile to merge");
            return 0;
        }
        Err(e) => {
            warn!("⚠️ Remote pull failed: {:#}", e);
            return 0;
        }
    };

    let mut merged = 0;
    for (key, value) in &remote {
        match store.write_key(key, value) {
            Ok(()) => merged += 1,
            Err(e) => error!("Failed to apply remote key '{}': {:#}", key, e),
        }
    }

    info!("Merged {} remote profile key(s)", merged);
    merged
}

/// Push the full current profile in the background. Fire-and-forget: the
/// caller's latency never depends on the mirror.
pub fn push_detached(store: &Arc<MemoryStore>, mirror: &Arc<dyn RemoteMirror>) {
    let store = store.clone();
    let mirror = mirror.clone();
    tokio::spawn(async move {
        let profile = match store.read_profile() {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Skipping remote push, profile read failed: {:#}", e);
                return;
            }
        };
        if let Err(e) = mirror.push(&profile).await {
            warn!("⚠️ Remote push failed (local write unaffected): {:#}", e);
        }
    });
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::tempdir;

    use super::testing::MockMirror;
    use super::*;
    use crate::memory::models::MemoryProfile;

    fn test_store() -> (tempfile::TempDir, Arc<MemoryStore>) {
        let dir = tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("test.db")).unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn test_merge_remote_wins_per_key() {
        let (_dir, store) = test_store();
        store.write_key("name", &json!("local")).unwrap();

        let mut remote = MemoryProfile::new();
        remote.insert("name".to_string(), json!("remote"));
        remote.insert("city".to_string(), json!("Lisbon"));
        let mirror = MockMirror::with_profile(remote);

        let merged = merge_remote_into_local(&store, &mirror).await;
        assert_eq!(merged, 2);
        assert_eq!(mirror.pulls(), 1);

        let profile = store.read_profile().unwrap();
        assert_eq!(profile["name"], json!("remote"));
        assert_eq!(profile["city"], json!("Lisbon"));
    }

    #[tokio::test]
    async fn test_merge_tolerates_missing_remote() {
        let (_dir, store) = test_store();
        let mirror = MockMirror::empty();

        assert_eq!(merge_remote_into_local(&store, &mirror).await, 0);
        assert!(store.read_profile().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_tolerates_pull_failure() {
        let (_dir, store) = test_store();
        store.write_key("keep", &json!(true)).unwrap();

        let mut mirror = MockMirror::empty();
        mirror.fail_pulls = true;

        assert_eq!(merge_remote_into_local(&store, &mirror).await, 0);
        // Local state untouched by the failed sync
        assert_eq!(store.read_profile().unwrap()["keep"], json!(true));
    }

    #[tokio::test]
    async fn test_push_detached_sends_full_profile() {
        let (_dir, store) = test_store();
        store.write_key("todo", &json!("buy milk")).unwrap();

        let mock = Arc::new(MockMirror::empty());
        let mirror: Arc<dyn RemoteMirror> = mock.clone();
        push_detached(&store, &mirror);

        // Detached task; poll until it lands
        for _ in 0..100 {
            if mock.pushes() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mock.pushes(), 1);

        let pushed = mock.remote.lock().unwrap().clone().unwrap();
        assert_eq!(pushed["todo"], json!("buy milk"));
    }
}
