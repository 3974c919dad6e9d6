use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::storage::{self, Viewer};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("viewer not found")]
    ViewerNotFound,
}

/// Holds the viewer identity engagement actions run under. Anonymous
/// browsing is fine; likes and deletes need an active viewer.
pub struct Manager {
    store: Arc<storage::Store>,
    active: RwLock<Option<Viewer>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>) -> Self {
        Self {
            store,
            active: RwLock::new(None),
        }
    }

    /// Restores the viewer from the previous run, if any.
    pub fn load_existing(&self) -> Result<()> {
        if let Some(viewer) = self.store.active_viewer()? {
            *self.active.write() = Some(viewer);
        }
        Ok(())
    }

    pub fn active(&self) -> Option<Viewer> {
        self.active.read().clone()
    }

    pub fn active_viewer_id(&self) -> Option<String> {
        self.active.read().as_ref().map(|viewer| viewer.id.clone())
    }

    pub fn sign_in(&self, viewer: Viewer) -> Result<()> {
        self.store.upsert_viewer(viewer.clone())?;
        self.store.set_active_viewer(&viewer.id)?;
        *self.active.write() = Some(viewer);
        Ok(())
    }

    pub fn switch(&self, viewer_id: &str) -> Result<Viewer> {
        let viewer = self
            .store
            .get_viewer(viewer_id)?
            .ok_or(SessionError::ViewerNotFound)?;
        self.store.set_active_viewer(&viewer.id)?;
        *self.active.write() = Some(viewer.clone());
        Ok(viewer)
    }

    pub fn sign_out(&self) -> Result<()> {
        self.store.clear_active_viewer()?;
        *self.active.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> Manager {
        let store = storage::Store::open(storage::Options {
            path: Some(dir.path().join("session.db")),
        })
        .unwrap();
        Manager::new(Arc::new(store))
    }

    fn viewer(id: &str) -> Viewer {
        Viewer {
            id: id.into(),
            display_name: id.to_uppercase(),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            updated_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn sign_in_persists_and_restores() {
        let dir = tempdir().unwrap();
        {
            let manager = manager(&dir);
            manager.sign_in(viewer("u1")).unwrap();
            assert_eq!(manager.active_viewer_id().as_deref(), Some("u1"));
        }
        let manager = manager(&dir);
        assert!(manager.active().is_none());
        manager.load_existing().unwrap();
        assert_eq!(manager.active_viewer_id().as_deref(), Some("u1"));
    }

    #[test]
    fn switch_to_unknown_viewer_fails() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        assert!(manager.switch("missing").is_err());
    }

    #[test]
    fn sign_out_clears_identity() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        manager.sign_in(viewer("u1")).unwrap();
        manager.sign_out().unwrap();
        assert!(manager.active().is_none());
        manager.load_existing().unwrap();
        assert!(manager.active().is_none());
    }
}
