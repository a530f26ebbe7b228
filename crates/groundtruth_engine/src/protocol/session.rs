//! Process-wide session registry for the session transport
//!
//! One live session per engine URL. Created on first use, dropped by
//! `clear` whenever a call on it fails at the transport level. The
//! handshake runs at most once per URL even under concurrent first use.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

use groundtruth_common::error::Result;

static GLOBAL_REGISTRY: Lazy<Arc<SessionRegistry>> =
    Lazy::new(|| Arc::new(SessionRegistry::default()));

/// A completed handshake with one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub engine_url: String,
    pub initialized: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<OnceCell<Session>>>>,
}

impl SessionRegistry {
    /// The registry shared by every client in the process
    pub fn global() -> Arc<SessionRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    fn slot(&self, engine_url: &str) -> Arc<OnceCell<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(engine_url.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Existing session for `engine_url`, or the result of `handshake`.
    /// A failed handshake leaves the slot empty so the next call retries.
    pub async fn get_or_init<F, Fut>(&self, engine_url: &str, handshake: F) -> Result<Session>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let slot = self.slot(engine_url);
        let session = slot.get_or_try_init(handshake).await?;
        Ok(session.clone())
    }

    /// Current session, without creating one
    pub fn get(&self, engine_url: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(engine_url).and_then(|slot| slot.get().cloned())
    }

    /// Forget the session so the next call performs a fresh handshake
    pub fn clear(&self, engine_url: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let removed = sessions.remove(engine_url).is_some();
        if removed {
            debug!(engine_url, "session cleared");
        }
        removed
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop the process-wide session for `engine_url`
pub fn clear_session(engine_url: &str) -> bool {
    GLOBAL_REGISTRY.clear(engine_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundtruth_common::GroundTruthError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            engine_url: "http://engine".to_string(),
            initialized: true,
        }
    }

    #[tokio::test]
    async fn test_handshake_runs_once_under_concurrency() {
        let registry = Arc::new(SessionRegistry::default());
        let handshakes = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let handshakes = handshakes.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_init("http://engine", || async move {
                        handshakes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(session("s-1"))
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().session_id, "s-1");
        }
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_new_handshake() {
        let registry = SessionRegistry::default();
        registry
            .get_or_init("http://engine", || async { Ok(session("s-1")) })
            .await
            .unwrap();
        assert!(registry.clear("http://engine"));
        assert!(registry.get("http://engine").is_none());

        let fresh = registry
            .get_or_init("http://engine", || async { Ok(session("s-2")) })
            .await
            .unwrap();
        assert_eq!(fresh.session_id, "s-2");
    }

    #[tokio::test]
    async fn test_failed_handshake_is_not_cached() {
        let registry = SessionRegistry::default();
        let err = registry
            .get_or_init("http://engine", || async {
                Err(GroundTruthError::Transport("connection refused".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(registry.is_empty());

        let ok = registry
            .get_or_init("http://engine", || async { Ok(session("s-3")) })
            .await
            .unwrap();
        assert_eq!(ok.session_id, "s-3");
    }
}
