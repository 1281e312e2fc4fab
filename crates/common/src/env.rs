//! Environment/runtime helpers
//!
//! Sanity checks to ensure expected directories exist at startup.

use tracing::info;

/// Ensure the storage directory exists; stores write one file per key into it.
pub async fn ensure_env(storage_dir: &str) -> anyhow::Result<()> {
    if tokio::fs::metadata(storage_dir).await.is_err() {
        info!(%storage_dir, "storage directory missing, creating it");
    }
    tokio::fs::create_dir_all(storage_dir)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {storage_dir}: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_nested_storage_dir() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("common_env_{}", uuid::Uuid::new_v4())).join("storage");
        let dir_str = dir.to_string_lossy().to_string();
        ensure_env(&dir_str).await?;
        assert!(tokio::fs::metadata(&dir).await?.is_dir());
        // idempotent
        ensure_env(&dir_str).await?;
        let _ = tokio::fs::remove_dir_all(dir.parent().unwrap()).await;
        Ok(())
    }
}
