//! Application context: one explicit object built at startup and passed to
//! whoever needs persistence, instead of hidden process-wide singletons.

use std::path::Path;
use std::sync::Arc;

use directories::ProjectDirs;

use crate::crypto::MessageCipher;
use crate::error::{Result, StoreError};
use crate::profile::ProfileStore;
use crate::repository::{
    AppointmentRepository, AuthRepository, ChatRepository, RecipeRepository, SharedDatabase,
};

const DB_FILE: &str = "nourish.db";

/// The app's persistence surface: one shared store handle and one
/// repository per aggregate. Construct it once; clone repositories freely.
pub struct AppContext {
    store: SharedDatabase,
    pub recipes: RecipeRepository,
    pub appointments: AppointmentRepository,
    pub chat: ChatRepository,
    pub auth: AuthRepository,
}

impl AppContext {
    #[must_use]
    pub fn new(
        store: SharedDatabase,
        profiles: Arc<dyn ProfileStore>,
        cipher: MessageCipher,
    ) -> Self {
        Self {
            recipes: RecipeRepository::new(store.clone()),
            appointments: AppointmentRepository::new(store.clone()),
            chat: ChatRepository::new(store.clone(), cipher),
            auth: AuthRepository::new(profiles),
            store,
        }
    }

    /// Open the store in the platform data directory:
    /// - Linux:   `~/.local/share/nourish/nourish.db`
    /// - macOS:   `~/Library/Application Support/com.nourish.nourish/nourish.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\nourish\nourish\data\nourish.db`
    pub fn open_default(
        profiles: Arc<dyn ProfileStore>,
        cipher: MessageCipher,
    ) -> Result<Self> {
        let dirs = ProjectDirs::from("com", "nourish", "nourish").ok_or(StoreError::NoDataDir)?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Self::open_at(&data_dir.join(DB_FILE), profiles, cipher)
    }

    pub fn open_at(
        path: &Path,
        profiles: Arc<dyn ProfileStore>,
        cipher: MessageCipher,
    ) -> Result<Self> {
        Ok(Self::new(SharedDatabase::open(path)?, profiles, cipher))
    }

    /// Ephemeral store, mainly for tests.
    pub fn open_in_memory(
        profiles: Arc<dyn ProfileStore>,
        cipher: MessageCipher,
    ) -> Result<Self> {
        Ok(Self::new(SharedDatabase::open_in_memory()?, profiles, cipher))
    }

    /// Direct access to the shared store handle, for callers that need
    /// operations the repositories don't expose.
    #[must_use]
    pub fn store(&self) -> &SharedDatabase {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Appointment, Recipe};
    use crate::profile::MemoryProfileStore;

    fn test_context() -> AppContext {
        AppContext::open_in_memory(
            Arc::new(MemoryProfileStore::new()),
            MessageCipher::from_secret("test-secret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_repositories_share_one_store() {
        let ctx = test_context();

        let appt = ctx
            .appointments
            .book(Appointment::new("Dr. Silva", "Nutritionist", 1_000))
            .await
            .unwrap();
        ctx.chat.send_user_message(appt.id, "hi").await.unwrap();

        ctx.recipes
            .add(Recipe::new("Oatmeal", "1 bowl", 350, 12.0, 60.0, 7.0))
            .await
            .unwrap();

        assert_eq!(ctx.appointments.list().await.unwrap().len(), 1);
        assert_eq!(ctx.chat.messages(appt.id).await.unwrap().len(), 1);
        assert_eq!(ctx.recipes.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_at_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DB_FILE);

        {
            let ctx = AppContext::open_at(
                &path,
                Arc::new(MemoryProfileStore::new()),
                MessageCipher::from_secret("test-secret"),
            )
            .unwrap();
            ctx.recipes
                .add(Recipe::new("Oatmeal", "1 bowl", 350, 12.0, 60.0, 7.0))
                .await
                .unwrap();
        }

        let reopened = AppContext::open_at(
            &path,
            Arc::new(MemoryProfileStore::new()),
            MessageCipher::from_secret("test-secret"),
        )
        .unwrap();
        assert_eq!(reopened.recipes.list().await.unwrap().len(), 1);
    }
}
