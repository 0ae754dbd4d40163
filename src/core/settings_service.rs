//! Settings service (§4.J): a thin typed accessor over the `Settings`
//! singleton row, wrapping connection secrets in [`crate::core::secrets`]
//! and notifying the scheduler to re-read job configuration on write.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::core::secrets::SecretsCipher;
use crate::db::settings::{JobConfig, SettingsRecord, SettingsRepository};
use crate::errors::AppResult;

/// Sent over [`SettingsService::job_config_changes`] whenever a write lands;
/// the scheduler subscribes and re-reads job configuration on receipt.
#[derive(Clone)]
pub struct SettingsService {
    repo: SettingsRepository,
    cipher: Arc<SecretsCipher>,
    job_config_tx: watch::Sender<()>,
}

impl SettingsService {
    pub fn new(repo: SettingsRepository, cipher: SecretsCipher) -> Self {
        let (job_config_tx, _rx) = watch::channel(());
        Self { repo, cipher: Arc::new(cipher), job_config_tx }
    }

    /// Subscribe to be notified whenever a job's schedule changes. The
    /// scheduler holds one receiver for its whole lifetime.
    pub fn job_config_changes(&self) -> watch::Receiver<()> {
        self.job_config_tx.subscribe()
    }

    pub async fn get(&self) -> AppResult<SettingsRecord> {
        Ok(self.repo.get().await?)
    }

    pub async fn set_base_url(&self, base_url: &str) -> AppResult<SettingsRecord> {
        Ok(self.repo.set_base_url(base_url).await?)
    }

    pub async fn set_theme(&self, theme: &str) -> AppResult<SettingsRecord> {
        Ok(self.repo.set_theme(theme).await?)
    }

    pub async fn set_request_approval_policy(&self, policy: &str) -> AppResult<SettingsRecord> {
        Ok(self.repo.set_request_approval_policy(policy).await?)
    }

    pub async fn set_default_request_limit(&self, limit: i64) -> AppResult<SettingsRecord> {
        Ok(self.repo.set_default_request_limit(limit).await?)
    }

    pub async fn set_request_retention_days(&self, days: i64) -> AppResult<SettingsRecord> {
        Ok(self.repo.set_request_retention_days(days).await?)
    }

    pub async fn set_library_sync_allow_list(&self, list: &[String]) -> AppResult<SettingsRecord> {
        Ok(self.repo.set_library_sync_allow_list(list).await?)
    }

    /// Persists a job's schedule and wakes any subscribed scheduler.
    pub async fn set_job_config(&self, job_name: &str, config: JobConfig) -> AppResult<SettingsRecord> {
        let settings = self.repo.set_job_config(job_name, config).await?;
        let _ = self.job_config_tx.send(());
        Ok(settings)
    }

    /// Encrypts `value` before it is persisted; `key` names the downstream
    /// (e.g. `"radarr:<instance_id>"`).
    pub async fn set_connection_secret(&self, key: &str, value: &str) -> AppResult<SettingsRecord> {
        let (ciphertext, nonce) = self.cipher.encrypt(value)?;
        let packed = format!("{ciphertext}.{nonce}");
        Ok(self.repo.set_connection_secret(key, &packed).await?)
    }

    /// Decrypts every stored secret. Callers that only need one value should
    /// still go through this map — there's no dedicated single-key fetch
    /// since reads of this map happen rarely (instance connect, on demand).
    pub fn decrypt_connection_secrets(
        &self,
        settings: &SettingsRecord,
    ) -> AppResult<HashMap<String, String>> {
        let mut out = HashMap::new();
        for (key, packed) in settings.connection_secrets() {
            let Some((ciphertext, nonce)) = packed.split_once('.') else {
                continue;
            };
            out.insert(key, self.cipher.decrypt(ciphertext, nonce)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    fn service(pool: Database) -> SettingsService {
        SettingsService::new(SettingsRepository::new(pool), SecretsCipher::new(b"test-key"))
    }

    #[tokio::test]
    async fn connection_secret_round_trips_through_encryption() {
        let service = service(pool().await);
        let settings = service.set_connection_secret("radarr:inst-1", "super-secret-key").await.unwrap();
        let stored = settings.connection_secrets();
        assert_ne!(stored["radarr:inst-1"], "super-secret-key");

        let decrypted = service.decrypt_connection_secrets(&settings).unwrap();
        assert_eq!(decrypted["radarr:inst-1"], "super-secret-key");
    }

    #[tokio::test]
    async fn job_config_write_notifies_subscriber() {
        let service = service(pool().await);
        let mut rx = service.job_config_changes();
        service
            .set_job_config("library_sync", JobConfig { interval_seconds: 3600, enabled: true })
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
    }
}
