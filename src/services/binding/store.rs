use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{
    error::Result,
    services::{auth::Token, binding::session::BindingSession},
};

/// JSON snapshot of the binding session so a round trip that outlives the
/// process can be resumed.
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A store that keeps nothing across restarts.
    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    pub async fn load(&self) -> Result<Option<BindingSession>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn save(&self, session: &BindingSession) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        write_atomically(path, &serde_json::to_vec_pretty(session)?).await
    }

    pub async fn clear(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        match fs::remove_file(path).await {
            Err(error) if error.kind() != std::io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}

/// Credential storage owned outside the binding flow. Written exactly once per
/// successful bind.
pub trait TokenSink: Send + Sync {
    fn store(&self, token: &Token) -> Result<()>;
}

pub struct FileTokenSink {
    path: PathBuf,
}

impl FileTokenSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenSink for FileTokenSink {
    fn store(&self, token: &Token) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(token)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::at(dir.path().join("session.json"));

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = BindingSession::begin();
        session.pending_connect_result = true;
        SessionStore::at(&path).save(&session).await.unwrap();

        let loaded = SessionStore::at(&path).load().await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(loaded.pending_connect_result());

        SessionStore::at(&path).clear().await.unwrap();
        assert!(SessionStore::at(&path).load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ephemeral_store_keeps_nothing() {
        let store = SessionStore::ephemeral();
        store.save(&BindingSession::begin()).await.unwrap();

        assert!(store.load().await.unwrap().is_none());
    }

    #[test]
    fn token_sink_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let token = Token::parse(r#"{"access_token":"A","refresh_token":"B"}"#).unwrap();

        FileTokenSink::new(&path).store(&token).unwrap();

        let stored: Token = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, token);
    }
}
