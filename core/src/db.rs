use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::broadcast;

use crate::error::{Result, StoreError};
use crate::events::{CHANGE_FEED_CAPACITY, Table};
use crate::models::{Appointment, ChatMessage, Recipe, Sender, UNSAVED_ID};

/// Schema version this build reads and writes.
const SCHEMA_VERSION: i64 = 4;

#[derive(Debug)]
pub struct Database {
    conn: Connection,
    changes: broadcast::Sender<Table>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Cascading deletes rely on this; SQLite ships with it off.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let db = Database { conn, changes };
        db.migrate()?;
        Ok(db)
    }

    /// Subscribe to the table-change feed. Events fire after every
    /// successful write, including cascades.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Table> {
        self.changes.subscribe()
    }

    fn notify(&self, table: Table) {
        // No receivers is the normal case at startup.
        let _ = self.changes.send(table);
    }

    /// Bring the file up to [`SCHEMA_VERSION`], one recorded step at a
    /// time. A file stamped newer than this build fails loudly; there is
    /// no destructive fallback at any version distance.
    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version < SCHEMA_VERSION {
            tracing::info!(from = version, to = SCHEMA_VERSION, "migrating database");
        }

        if version < 1 {
            self.conn
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS recipes (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        name TEXT NOT NULL,
                        quantity TEXT NOT NULL,
                        calories INTEGER NOT NULL,
                        protein REAL NOT NULL,
                        carbs REAL NOT NULL,
                        fats REAL NOT NULL
                    );

                    PRAGMA user_version = 1;",
                )
                .map_err(|e| StoreError::Migration(format!("v1: {e}")))?;
        }

        if version < 2 {
            // Pre-existing rows all get the migration-time stamp; their
            // true creation times were never recorded.
            let now = Utc::now().timestamp_millis();
            self.conn
                .execute_batch(&format!(
                    "ALTER TABLE recipes ADD COLUMN timestamp INTEGER NOT NULL DEFAULT {now};

                    PRAGMA user_version = 2;"
                ))
                .map_err(|e| StoreError::Migration(format!("v2: {e}")))?;
        }

        if version < 3 {
            self.conn
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS appointments (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        specialist_name TEXT NOT NULL,
                        specialist_specialty TEXT NOT NULL,
                        appointment_timestamp INTEGER NOT NULL
                    );

                    PRAGMA user_version = 3;",
                )
                .map_err(|e| StoreError::Migration(format!("v3: {e}")))?;
        }

        if version < 4 {
            self.conn
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS chat_messages (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        appointment_id INTEGER NOT NULL
                            REFERENCES appointments(id) ON DELETE CASCADE,
                        message_text TEXT NOT NULL,
                        timestamp INTEGER NOT NULL,
                        sender TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_chat_messages_appointment
                        ON chat_messages(appointment_id);

                    PRAGMA user_version = 4;",
                )
                .map_err(|e| StoreError::Migration(format!("v4: {e}")))?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            calories: row.get(3)?,
            protein: row.get(4)?,
            carbs: row.get(5)?,
            fats: row.get(6)?,
            timestamp: row.get(7)?,
        })
    }

    fn appointment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
        Ok(Appointment {
            id: row.get(0)?,
            specialist_name: row.get(1)?,
            specialist_specialty: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }

    fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
        let sender_raw: String = row.get(4)?;
        let sender = Sender::from_db(&sender_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown sender '{sender_raw}'").into(),
            )
        })?;
        Ok(ChatMessage {
            id: row.get(0)?,
            appointment_id: row.get(1)?,
            text: row.get(2)?,
            timestamp: row.get(3)?,
            sender,
        })
    }

    // --- Recipes ---

    /// Insert-or-replace. An unsaved recipe (id 0) gets a fresh id; a
    /// nonzero id overwrites that row wholesale. Returns the stored row.
    pub fn insert_or_replace_recipe(&self, recipe: &Recipe) -> Result<Recipe> {
        let id = if recipe.id == UNSAVED_ID {
            self.conn.execute(
                "INSERT INTO recipes (name, quantity, calories, protein, carbs, fats, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    recipe.name,
                    recipe.quantity,
                    recipe.calories,
                    recipe.protein,
                    recipe.carbs,
                    recipe.fats,
                    recipe.timestamp,
                ],
            )?;
            self.conn.last_insert_rowid()
        } else {
            self.conn.execute(
                "INSERT OR REPLACE INTO recipes (id, name, quantity, calories, protein, carbs, fats, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    recipe.id,
                    recipe.name,
                    recipe.quantity,
                    recipe.calories,
                    recipe.protein,
                    recipe.carbs,
                    recipe.fats,
                    recipe.timestamp,
                ],
            )?;
            recipe.id
        };
        self.notify(Table::Recipes);
        self.get_recipe(id)?.ok_or(StoreError::NotFound)
    }

    /// Update an existing row. A missing id is a no-op, never an insert.
    pub fn update_recipe(&self, recipe: &Recipe) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE recipes
             SET name = ?2, quantity = ?3, calories = ?4, protein = ?5, carbs = ?6, fats = ?7, timestamp = ?8
             WHERE id = ?1",
            params![
                recipe.id,
                recipe.name,
                recipe.quantity,
                recipe.calories,
                recipe.protein,
                recipe.carbs,
                recipe.fats,
                recipe.timestamp,
            ],
        )?;
        if affected > 0 {
            self.notify(Table::Recipes);
        }
        Ok(affected > 0)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        if affected > 0 {
            self.notify(Table::Recipes);
        }
        Ok(affected > 0)
    }

    /// Newest insert first.
    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, quantity, calories, protein, carbs, fats, timestamp
             FROM recipes ORDER BY id DESC",
        )?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                "SELECT id, name, quantity, calories, protein, carbs, fats, timestamp
                 FROM recipes WHERE id = ?1",
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    // --- Appointments ---

    /// No uniqueness beyond the id: two bookings with the same specialist
    /// and time persist as distinct rows.
    pub fn insert_or_replace_appointment(&self, appointment: &Appointment) -> Result<Appointment> {
        let id = if appointment.id == UNSAVED_ID {
            self.conn.execute(
                "INSERT INTO appointments (specialist_name, specialist_specialty, appointment_timestamp)
                 VALUES (?1, ?2, ?3)",
                params![
                    appointment.specialist_name,
                    appointment.specialist_specialty,
                    appointment.timestamp,
                ],
            )?;
            self.conn.last_insert_rowid()
        } else {
            self.conn.execute(
                "INSERT OR REPLACE INTO appointments (id, specialist_name, specialist_specialty, appointment_timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    appointment.id,
                    appointment.specialist_name,
                    appointment.specialist_specialty,
                    appointment.timestamp,
                ],
            )?;
            appointment.id
        };
        self.notify(Table::Appointments);
        self.get_appointment(id)?.ok_or(StoreError::NotFound)
    }

    /// Deletes the appointment and, through the foreign key, its chat
    /// messages. Observers of both tables are notified.
    pub fn delete_appointment(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
        if affected > 0 {
            self.notify(Table::Appointments);
            self.notify(Table::ChatMessages);
        }
        Ok(affected > 0)
    }

    /// Soonest-last: ordered by scheduled time, descending.
    pub fn list_appointments(&self) -> Result<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, specialist_name, specialist_specialty, appointment_timestamp
             FROM appointments ORDER BY appointment_timestamp DESC",
        )?;
        let appointments = stmt
            .query_map([], Self::appointment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(appointments)
    }

    pub fn get_appointment(&self, id: i64) -> Result<Option<Appointment>> {
        let appointment = self
            .conn
            .query_row(
                "SELECT id, specialist_name, specialist_specialty, appointment_timestamp
                 FROM appointments WHERE id = ?1",
                params![id],
                Self::appointment_from_row,
            )
            .optional()?;
        Ok(appointment)
    }

    // --- Chat messages ---

    /// The text is stored exactly as given; sealing it is the caller's
    /// concern. Referencing a missing appointment fails the foreign key
    /// check and surfaces as a database error.
    pub fn insert_or_replace_message(&self, message: &ChatMessage) -> Result<ChatMessage> {
        let id = if message.id == UNSAVED_ID {
            self.conn.execute(
                "INSERT INTO chat_messages (appointment_id, message_text, timestamp, sender)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    message.appointment_id,
                    message.text,
                    message.timestamp,
                    message.sender.as_str(),
                ],
            )?;
            self.conn.last_insert_rowid()
        } else {
            self.conn.execute(
                "INSERT OR REPLACE INTO chat_messages (id, appointment_id, message_text, timestamp, sender)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.appointment_id,
                    message.text,
                    message.timestamp,
                    message.sender.as_str(),
                ],
            )?;
            message.id
        };
        self.notify(Table::ChatMessages);
        self.get_message(id)?.ok_or(StoreError::NotFound)
    }

    /// Conversation order: timestamp ascending.
    pub fn messages_for_appointment(&self, appointment_id: i64) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, appointment_id, message_text, timestamp, sender
             FROM chat_messages WHERE appointment_id = ?1 ORDER BY timestamp ASC",
        )?;
        let messages = stmt
            .query_map(params![appointment_id], Self::message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn get_message(&self, id: i64) -> Result<Option<ChatMessage>> {
        let message = self
            .conn
            .query_row(
                "SELECT id, appointment_id, message_text, timestamp, sender
                 FROM chat_messages WHERE id = ?1",
                params![id],
                Self::message_from_row,
            )
            .optional()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recipe() -> Recipe {
        Recipe::new("Chicken Salad", "1 plate", 420, 35.0, 12.0, 22.0)
    }

    fn sample_appointment(timestamp: i64) -> Appointment {
        Appointment::new("Dr. Silva", "Nutritionist", timestamp)
    }

    // --- Recipes ---

    #[test]
    fn test_insert_assigns_id_and_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let recipe = sample_recipe();
        let stored = db.insert_or_replace_recipe(&recipe).unwrap();

        assert_eq!(stored.id, 1);
        assert_eq!(stored.name, recipe.name);
        assert_eq!(stored.quantity, recipe.quantity);
        assert_eq!(stored.calories, recipe.calories);
        assert_eq!(stored.protein, recipe.protein);
        assert_eq!(stored.carbs, recipe.carbs);
        assert_eq!(stored.fats, recipe.fats);
        assert_eq!(stored.timestamp, recipe.timestamp);

        let fetched = db.get_recipe(stored.id).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_insert_with_existing_id_overwrites_row() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_or_replace_recipe(&sample_recipe()).unwrap();

        let replacement = Recipe {
            name: "Tuna Salad".to_string(),
            calories: 380,
            ..first.clone()
        };
        let stored = db.insert_or_replace_recipe(&replacement).unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(stored.name, "Tuna Salad");
        assert_eq!(db.list_recipes().unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_id_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let ghost = Recipe {
            id: 99,
            ..sample_recipe()
        };
        assert!(!db.update_recipe(&ghost).unwrap());
        assert!(db.list_recipes().unwrap().is_empty());
    }

    #[test]
    fn test_update_existing_recipe() {
        let db = Database::open_in_memory().unwrap();
        let stored = db.insert_or_replace_recipe(&sample_recipe()).unwrap();

        let edited = Recipe {
            calories: 500,
            ..stored.clone()
        };
        assert!(db.update_recipe(&edited).unwrap());
        assert_eq!(db.get_recipe(stored.id).unwrap().unwrap().calories, 500);
    }

    #[test]
    fn test_delete_recipe() {
        let db = Database::open_in_memory().unwrap();
        let stored = db.insert_or_replace_recipe(&sample_recipe()).unwrap();

        assert!(db.delete_recipe(stored.id).unwrap());
        assert!(db.get_recipe(stored.id).unwrap().is_none());
        assert!(!db.delete_recipe(stored.id).unwrap());
    }

    #[test]
    fn test_recipes_listed_newest_insert_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_or_replace_recipe(&sample_recipe()).unwrap();
        db.insert_or_replace_recipe(&Recipe::new("Omelette", "2 eggs", 180, 13.0, 2.0, 13.0))
            .unwrap();

        let names: Vec<_> = db
            .list_recipes()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["Omelette", "Chicken Salad"]);
    }

    // --- Appointments ---

    #[test]
    fn test_appointments_ordered_by_time_descending() {
        let db = Database::open_in_memory().unwrap();
        db.insert_or_replace_appointment(&sample_appointment(1_000)).unwrap();
        db.insert_or_replace_appointment(&Appointment::new("Dr. Costa", "Endocrinologist", 3_000))
            .unwrap();
        db.insert_or_replace_appointment(&Appointment::new("Dr. Lima", "Dietitian", 2_000))
            .unwrap();

        let times: Vec<_> = db
            .list_appointments()
            .unwrap()
            .into_iter()
            .map(|a| a.timestamp)
            .collect();
        assert_eq!(times, [3_000, 2_000, 1_000]);
    }

    #[test]
    fn test_duplicate_bookings_persist_as_distinct_rows() {
        // "One active appointment" is a UI rule, not a storage constraint:
        // identical specialist and time must both land.
        let db = Database::open_in_memory().unwrap();
        let a1 = db.insert_or_replace_appointment(&sample_appointment(5_000)).unwrap();
        let a2 = db.insert_or_replace_appointment(&sample_appointment(5_000)).unwrap();

        assert_ne!(a1.id, a2.id);
        assert_eq!(db.list_appointments().unwrap().len(), 2);
    }

    // --- Chat messages ---

    #[test]
    fn test_messages_ordered_by_timestamp_ascending() {
        let db = Database::open_in_memory().unwrap();
        let appt = db.insert_or_replace_appointment(&sample_appointment(5_000)).unwrap();

        for (ts, text) in [(300, "third"), (100, "first"), (200, "second")] {
            let message = ChatMessage {
                timestamp: ts,
                ..ChatMessage::user(appt.id, text)
            };
            db.insert_or_replace_message(&message).unwrap();
        }

        let texts: Vec<_> = db
            .messages_for_appointment(appt.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn test_message_requires_existing_appointment() {
        let db = Database::open_in_memory().unwrap();
        let orphan = ChatMessage::user(42, "hello?");
        let err = db.insert_or_replace_message(&orphan).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn test_deleting_appointment_cascades_to_exactly_its_messages() {
        let db = Database::open_in_memory().unwrap();
        let doomed = db.insert_or_replace_appointment(&sample_appointment(1_000)).unwrap();
        let kept = db
            .insert_or_replace_appointment(&Appointment::new("Dr. Costa", "Endocrinologist", 2_000))
            .unwrap();

        db.insert_or_replace_message(&ChatMessage::user(doomed.id, "see you then")).unwrap();
        db.insert_or_replace_message(&ChatMessage::specialist(doomed.id, "confirmed")).unwrap();
        db.insert_or_replace_message(&ChatMessage::user(kept.id, "unrelated")).unwrap();

        assert!(db.delete_appointment(doomed.id).unwrap());

        assert!(db.messages_for_appointment(doomed.id).unwrap().is_empty());
        let survivors = db.messages_for_appointment(kept.id).unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].text, "unrelated");
    }

    #[test]
    fn test_sender_stored_and_restored() {
        let db = Database::open_in_memory().unwrap();
        let appt = db.insert_or_replace_appointment(&sample_appointment(1_000)).unwrap();

        let user = db
            .insert_or_replace_message(&ChatMessage::user(appt.id, "hi"))
            .unwrap();
        let specialist = db
            .insert_or_replace_message(&ChatMessage::specialist(appt.id, "hello"))
            .unwrap();

        assert_eq!(user.sender, Sender::User);
        assert_eq!(specialist.sender, Sender::Specialist);
    }

    // --- Change feed ---

    #[test]
    fn test_writes_publish_table_changes() {
        let db = Database::open_in_memory().unwrap();
        let mut rx = db.subscribe();

        let recipe = db.insert_or_replace_recipe(&sample_recipe()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Table::Recipes);

        db.delete_recipe(recipe.id).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Table::Recipes);

        // Failed writes publish nothing.
        assert!(!db.delete_recipe(recipe.id).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cascade_notifies_chat_observers() {
        let db = Database::open_in_memory().unwrap();
        let appt = db.insert_or_replace_appointment(&sample_appointment(1_000)).unwrap();
        db.insert_or_replace_message(&ChatMessage::user(appt.id, "hi")).unwrap();

        let mut rx = db.subscribe();
        db.delete_appointment(appt.id).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Table::Appointments);
        assert_eq!(rx.try_recv().unwrap(), Table::ChatMessages);
    }

    // --- Migrations ---

    /// Schema v1: recipes without the timestamp column.
    const SCHEMA_V1: &str = "CREATE TABLE recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            quantity TEXT NOT NULL,
            calories INTEGER NOT NULL,
            protein REAL NOT NULL,
            carbs REAL NOT NULL,
            fats REAL NOT NULL
        );
        PRAGMA user_version = 1;";

    #[test]
    fn test_migration_backfills_recipe_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nourish.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA_V1).unwrap();
            conn.execute(
                "INSERT INTO recipes (name, quantity, calories, protein, carbs, fats)
                 VALUES ('Oats', '1 bowl', 350, 12.0, 60.0, 7.0),
                        ('Eggs', '2 units', 140, 12.0, 1.0, 10.0)",
                [],
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let recipes = db.list_recipes().unwrap();
        assert_eq!(recipes.len(), 2);
        for recipe in &recipes {
            assert!(recipe.timestamp > 0);
        }

        let eggs = recipes.iter().find(|r| r.name == "Eggs").unwrap();
        assert_eq!(eggs.quantity, "2 units");
        assert_eq!(eggs.calories, 140);
        assert_eq!(eggs.protein, 12.0);
        assert_eq!(eggs.carbs, 1.0);
        assert_eq!(eggs.fats, 10.0);
    }

    #[test]
    fn test_migrated_store_reaches_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nourish.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA_V1).unwrap();
        }

        // All later tables exist after reopening.
        let db = Database::open(&path).unwrap();
        let appt = db.insert_or_replace_appointment(&sample_appointment(1_000)).unwrap();
        db.insert_or_replace_message(&ChatMessage::user(appt.id, "hi")).unwrap();

        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nourish.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedSchemaVersion {
                found: 99,
                supported: SCHEMA_VERSION,
            }
        ));
    }
}
