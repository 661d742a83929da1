use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds, the stored representation for every
/// timestamp in the local database and the profile document.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Sentinel id carried by domain values that have not been persisted yet.
/// The store assigns a real id on insert.
pub const UNSAVED_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    /// Free text, e.g. "2 servings". Not validated or parsed.
    pub quantity: String,
    pub calories: i64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
    /// Creation time, epoch millis.
    pub timestamp: i64,
}

impl Recipe {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        quantity: impl Into<String>,
        calories: i64,
        protein: f64,
        carbs: f64,
        fats: f64,
    ) -> Self {
        Self {
            id: UNSAVED_ID,
            name: name.into(),
            quantity: quantity.into(),
            calories,
            protein,
            carbs,
            fats,
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub specialist_name: String,
    pub specialist_specialty: String,
    /// Scheduled time, epoch millis. May be in the future.
    pub timestamp: i64,
}

impl Appointment {
    #[must_use]
    pub fn new(
        specialist_name: impl Into<String>,
        specialist_specialty: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: UNSAVED_ID,
            specialist_name: specialist_name.into(),
            specialist_specialty: specialist_specialty.into(),
            timestamp,
        }
    }
}

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Specialist,
}

impl Sender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Specialist => "specialist",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Sender::User),
            "specialist" => Some(Sender::Specialist),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    /// Owning appointment. Deleting the appointment deletes the message.
    pub appointment_id: i64,
    /// Plain text in the domain; ciphertext at rest.
    pub text: String,
    pub timestamp: i64,
    pub sender: Sender,
}

impl ChatMessage {
    #[must_use]
    pub fn user(appointment_id: i64, text: impl Into<String>) -> Self {
        Self::new(appointment_id, text, Sender::User)
    }

    #[must_use]
    pub fn specialist(appointment_id: i64, text: impl Into<String>) -> Self {
        Self::new(appointment_id, text, Sender::Specialist)
    }

    fn new(appointment_id: i64, text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id: UNSAVED_ID,
            appointment_id,
            text: text.into(),
            timestamp: now_millis(),
            sender,
        }
    }
}

/// Daily macro goals, applied to the profile on read when the remote
/// document does not carry explicit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroGoals {
    pub calories: i64,
    pub protein: i64,
    pub carbs: i64,
    pub fats: i64,
}

impl Default for MacroGoals {
    fn default() -> Self {
        Self {
            calories: 2000,
            protein: 100,
            carbs: 150,
            fats: 50,
        }
    }
}

pub fn validate_goal_macros(
    calories: i64,
    protein: i64,
    carbs: i64,
    fats: i64,
) -> Result<(), String> {
    for (label, value) in [
        ("calories", calories),
        ("protein", protein),
        ("carbs", carbs),
        ("fats", fats),
    ] {
        if value < 0 {
            return Err(format!("{label} must be non-negative (got {value})"));
        }
    }
    Ok(())
}

/// The signed-in user's profile, as seen by the rest of the app. Sourced
/// from the remote document store on every read; nothing is cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub name: String,
    pub age: i64,
    pub phone: String,
    pub weight: Option<f64>,
    pub goal: Option<String>,
    /// Goal target date, epoch millis.
    pub target_date: Option<i64>,
    /// Base64-encoded profile photo.
    pub photo: Option<String>,
    pub goals: MacroGoals,
}

impl UserProfile {
    /// Profile shape for a user whose document does not exist yet.
    #[must_use]
    pub fn empty(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: String::new(),
            age: 0,
            phone: String::new(),
            weight: None,
            goal: None,
            target_date: None,
            photo: None,
            goals: MacroGoals::default(),
        }
    }
}
