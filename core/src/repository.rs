//! Repository layer: the async seam between domain types and storage.
//!
//! Callers suspend at each operation; the blocking SQLite work runs on the
//! runtime's blocking pool behind a process-shared handle. One repository
//! per aggregate. `AuthRepository` is the odd one out: its backing store
//! is remote (see [`crate::profile`]), so nothing it returns is cached
//! locally.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc};

use crate::crypto::MessageCipher;
use crate::db::Database;
use crate::error::Result;
use crate::events::{LiveResults, SNAPSHOT_BUFFER, Table};
use crate::models::{
    Appointment, ChatMessage, Recipe, UserProfile, now_millis, validate_goal_macros,
};
use crate::profile::{ProfileDocument, ProfileError, ProfileStore, ProfileUpdate};

/// Process-shared handle to the local store. Cloning is cheap; every clone
/// talks to the same database and the same change feed.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `op` against the database on the blocking pool. The caller
    /// suspends; the UI thread never blocks on SQLite.
    pub async fn with<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Database) -> Result<R> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let db = inner.lock().unwrap_or_else(PoisonError::into_inner);
            op(&db)
        })
        .await?
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Table> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe()
    }
}

/// Spawn a live query: deliver a snapshot now, then re-run the query and
/// deliver again on every change to `table`. Must be called from within a
/// tokio runtime.
fn observe<T, F>(store: &SharedDatabase, table: Table, query: F) -> LiveResults<T>
where
    T: Send + 'static,
    F: Fn(&Database) -> Result<Vec<T>> + Send + Sync + 'static,
{
    let store = store.clone();
    let mut changes = store.subscribe();
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
    let query = Arc::new(query);

    tokio::spawn(async move {
        loop {
            let q = Arc::clone(&query);
            match store.with(move |db| q(db)).await {
                Ok(snapshot) => {
                    if tx.send(snapshot).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, ?table, "live query failed, ending observation");
                    return;
                }
            }

            loop {
                tokio::select! {
                    () = tx.closed() => return,
                    changed = changes.recv() => match changed {
                        Ok(t) if t == table => break,
                        Ok(_) => {}
                        // Missed events only mean we requery a little late.
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        }
    });

    LiveResults::new(rx)
}

// --- Recipes ---

/// Reads are one-shot by design; there is no live recipe observation.
#[derive(Clone)]
pub struct RecipeRepository {
    store: SharedDatabase,
}

impl RecipeRepository {
    #[must_use]
    pub fn new(store: SharedDatabase) -> Self {
        Self { store }
    }

    /// Insert-or-replace; returns the stored recipe with its assigned id.
    pub async fn add(&self, recipe: Recipe) -> Result<Recipe> {
        self.store
            .with(move |db| db.insert_or_replace_recipe(&recipe))
            .await
    }

    /// Returns `false` when no row has the recipe's id; never inserts.
    pub async fn update(&self, recipe: &Recipe) -> Result<bool> {
        let recipe = recipe.clone();
        self.store.with(move |db| db.update_recipe(&recipe)).await
    }

    pub async fn delete(&self, recipe: &Recipe) -> Result<bool> {
        let id = recipe.id;
        self.store.with(move |db| db.delete_recipe(id)).await
    }

    pub async fn list(&self) -> Result<Vec<Recipe>> {
        self.store.with(Database::list_recipes).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Recipe>> {
        self.store.with(move |db| db.get_recipe(id)).await
    }
}

// --- Appointments ---

#[derive(Clone)]
pub struct AppointmentRepository {
    store: SharedDatabase,
}

impl AppointmentRepository {
    #[must_use]
    pub fn new(store: SharedDatabase) -> Self {
        Self { store }
    }

    /// Book (insert-or-replace). The store accepts overlapping bookings;
    /// "one active appointment" is a UI rule, not enforced here.
    pub async fn book(&self, appointment: Appointment) -> Result<Appointment> {
        self.store
            .with(move |db| db.insert_or_replace_appointment(&appointment))
            .await
    }

    /// Cancel; the appointment's chat history goes with it.
    pub async fn cancel(&self, appointment: &Appointment) -> Result<bool> {
        let id = appointment.id;
        self.store.with(move |db| db.delete_appointment(id)).await
    }

    pub async fn list(&self) -> Result<Vec<Appointment>> {
        self.store.with(Database::list_appointments).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Appointment>> {
        self.store.with(move |db| db.get_appointment(id)).await
    }

    /// All appointments, newest scheduled time first, re-emitted on every
    /// change to the table.
    #[must_use]
    pub fn observe_all(&self) -> LiveResults<Appointment> {
        observe(&self.store, Table::Appointments, Database::list_appointments)
    }
}

// --- Chat ---

/// Canned specialist reply used to simulate the counterparty while the
/// messaging backend is out of the picture.
#[must_use]
pub fn canned_specialist_reply(user_message: &str) -> &'static str {
    let normalized = user_message.to_lowercase();
    if normalized.contains("hello") || normalized.contains("hi") {
        "Hello! How can I help?"
    } else if normalized.contains("diet") {
        "About your diet, tell me more..."
    } else {
        "Received. Looking into it."
    }
}

/// Message text is sealed before it reaches the store and opened after
/// retrieval; the database only ever sees ciphertext.
#[derive(Clone)]
pub struct ChatRepository {
    store: SharedDatabase,
    cipher: MessageCipher,
}

impl ChatRepository {
    #[must_use]
    pub fn new(store: SharedDatabase, cipher: MessageCipher) -> Self {
        Self { store, cipher }
    }

    /// Store a message. The returned message carries the plain text and
    /// the assigned id.
    pub async fn send(&self, message: ChatMessage) -> Result<ChatMessage> {
        let plaintext = message.text.clone();
        let sealed = ChatMessage {
            text: self.cipher.encrypt(&message.text)?,
            ..message
        };
        let stored = self
            .store
            .with(move |db| db.insert_or_replace_message(&sealed))
            .await?;
        Ok(ChatMessage {
            text: plaintext,
            ..stored
        })
    }

    pub async fn send_user_message(
        &self,
        appointment_id: i64,
        text: impl Into<String>,
    ) -> Result<ChatMessage> {
        self.send(ChatMessage::user(appointment_id, text)).await
    }

    pub async fn send_specialist_reply(
        &self,
        appointment_id: i64,
        text: impl Into<String>,
    ) -> Result<ChatMessage> {
        self.send(ChatMessage::specialist(appointment_id, text))
            .await
    }

    /// One conversation, oldest first, decrypted.
    pub async fn messages(&self, appointment_id: i64) -> Result<Vec<ChatMessage>> {
        let cipher = self.cipher.clone();
        self.store
            .with(move |db| {
                let rows = db.messages_for_appointment(appointment_id)?;
                decrypt_all(&cipher, rows)
            })
            .await
    }

    /// Live view of one conversation.
    #[must_use]
    pub fn observe_messages(&self, appointment_id: i64) -> LiveResults<ChatMessage> {
        let cipher = self.cipher.clone();
        observe(&self.store, Table::ChatMessages, move |db| {
            let rows = db.messages_for_appointment(appointment_id)?;
            decrypt_all(&cipher, rows)
        })
    }
}

fn decrypt_all(cipher: &MessageCipher, rows: Vec<ChatMessage>) -> Result<Vec<ChatMessage>> {
    rows.into_iter()
        .map(|message| {
            Ok(ChatMessage {
                text: cipher.decrypt(&message.text)?,
                ..message
            })
        })
        .collect()
}

// --- Auth / profile ---

/// Owns the remote profile operations and the signed-in session.
///
/// Every read and write is a live round trip to the [`ProfileStore`];
/// there is no local cache or reconciliation.
pub struct AuthRepository {
    store: Arc<dyn ProfileStore>,
    session: RwLock<Option<String>>,
}

impl AuthRepository {
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            session: RwLock::new(None),
        }
    }

    /// Anonymous sign-in. The token is recorded as the current session.
    pub async fn sign_in_anonymously(&self) -> std::result::Result<String, ProfileError> {
        let uid = self.store.sign_in_anonymously().await?;
        *self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(uid.clone());
        Ok(uid)
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.current_uid().is_some()
    }

    #[must_use]
    pub fn current_uid(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_uid(&self) -> std::result::Result<String, ProfileError> {
        self.current_uid().ok_or(ProfileError::NotSignedIn)
    }

    /// Create or overwrite the whole profile document.
    pub async fn save_user_data(
        &self,
        name: &str,
        age: i64,
        phone: &str,
    ) -> std::result::Result<(), ProfileError> {
        let uid = self.require_uid()?;
        let doc = ProfileDocument {
            uid: Some(uid.clone()),
            name: Some(name.to_string()),
            age: Some(age),
            phone: Some(phone.to_string()),
            created_at: Some(now_millis()),
            ..ProfileDocument::default()
        };
        self.store.replace(&uid, doc).await
    }

    /// The current profile, or `None` when nobody is signed in. A signed-in
    /// user without a document gets a default-filled profile, not an error.
    pub async fn get_user_profile(&self) -> std::result::Result<Option<UserProfile>, ProfileError> {
        let Some(uid) = self.current_uid() else {
            return Ok(None);
        };
        match self.store.fetch(&uid).await {
            Ok(doc) => Ok(Some(doc.into_profile(&uid))),
            Err(ProfileError::NotFound) => Ok(Some(UserProfile::empty(uid))),
            Err(err) => Err(err),
        }
    }

    /// Merge-update the four goal fields, leaving everything else alone.
    pub async fn update_goals(
        &self,
        calories: i64,
        protein: i64,
        carbs: i64,
        fats: i64,
    ) -> std::result::Result<(), ProfileError> {
        validate_goal_macros(calories, protein, carbs, fats).map_err(ProfileError::InvalidGoals)?;
        let uid = self.require_uid()?;
        let patch = ProfileUpdate {
            goal_calories: Some(calories),
            goal_protein: Some(protein),
            goal_carbs: Some(carbs),
            goal_fats: Some(fats),
            ..ProfileUpdate::default()
        };
        self.store.merge(&uid, patch).await
    }

    /// Merge-update profile fields. Name, age and phone are always
    /// written; the optional fields only when supplied.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_user_profile(
        &self,
        name: &str,
        age: i64,
        phone: &str,
        weight: Option<f64>,
        goal: Option<String>,
        target_date: Option<i64>,
        photo: Option<String>,
    ) -> std::result::Result<(), ProfileError> {
        let uid = self.require_uid()?;
        let patch = ProfileUpdate {
            name: Some(name.to_string()),
            age: Some(age),
            phone: Some(phone.to_string()),
            weight,
            goal,
            target_date,
            photo,
            ..ProfileUpdate::default()
        };
        self.store.merge(&uid, patch).await
    }
}
