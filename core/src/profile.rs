//! Remote profile store contract.
//!
//! The user profile lives in a remote document store keyed by the
//! authentication identity, one document per uid. This module defines the
//! wire shape, the partial-update patch, the typed error taxonomy, and the
//! [`ProfileStore`] trait the repositories consume. The HTTP client lives
//! in the companion cloud crate; [`MemoryProfileStore`] here backs tests
//! and offline use.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{MacroGoals, UserProfile};

/// Remote-store failures, kept distinguishable instead of collapsed into a
/// boolean: "not found", "denied", and "unreachable" call for different
/// caller reactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile document not found")]
    NotFound,

    #[error("permission denied by the profile service")]
    PermissionDenied,

    /// Network or service hiccup; the operation is retryable.
    #[error("transient profile service failure: {0}")]
    Transient(String),

    #[error("anonymous sign-in failed: {0}")]
    Auth(String),

    #[error("no user is signed in")]
    NotSignedIn,

    #[error("invalid goal macros: {0}")]
    InvalidGoals(String),
}

/// Wire shape of a profile document. Every field is independently absent;
/// readers apply defaults, writers only send what they mean to set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_calories: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_protein: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_carbs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_fats: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl ProfileDocument {
    /// Merge a patch into this document: supplied fields overwrite, absent
    /// fields stay untouched.
    pub fn apply(&mut self, patch: &ProfileUpdate) {
        let ProfileUpdate {
            name,
            age,
            phone,
            weight,
            goal,
            target_date,
            photo,
            goal_calories,
            goal_protein,
            goal_carbs,
            goal_fats,
        } = patch;
        if let Some(v) = name {
            self.name = Some(v.clone());
        }
        if let Some(v) = age {
            self.age = Some(*v);
        }
        if let Some(v) = phone {
            self.phone = Some(v.clone());
        }
        if let Some(v) = weight {
            self.weight = Some(*v);
        }
        if let Some(v) = goal {
            self.goal = Some(v.clone());
        }
        if let Some(v) = target_date {
            self.target_date = Some(*v);
        }
        if let Some(v) = photo {
            self.photo = Some(v.clone());
        }
        if let Some(v) = goal_calories {
            self.goal_calories = Some(*v);
        }
        if let Some(v) = goal_protein {
            self.goal_protein = Some(*v);
        }
        if let Some(v) = goal_carbs {
            self.goal_carbs = Some(*v);
        }
        if let Some(v) = goal_fats {
            self.goal_fats = Some(*v);
        }
    }

    /// Map the document into the domain shape, substituting the fixed
    /// defaults for any absent goal field.
    #[must_use]
    pub fn into_profile(self, uid: &str) -> UserProfile {
        let defaults = MacroGoals::default();
        UserProfile {
            uid: uid.to_string(),
            name: self.name.unwrap_or_default(),
            age: self.age.unwrap_or_default(),
            phone: self.phone.unwrap_or_default(),
            weight: self.weight,
            goal: self.goal,
            target_date: self.target_date,
            photo: self.photo,
            goals: MacroGoals {
                calories: self.goal_calories.unwrap_or(defaults.calories),
                protein: self.goal_protein.unwrap_or(defaults.protein),
                carbs: self.goal_carbs.unwrap_or(defaults.carbs),
                fats: self.goal_fats.unwrap_or(defaults.fats),
            },
        }
    }
}

/// Partial-field update. Only `Some` fields are written; the rest of the
/// document is left untouched server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_calories: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_protein: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_carbs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_fats: Option<i64>,
}

/// Identity-keyed document store holding user profiles.
///
/// Implementations: the HTTP client in the cloud crate and
/// [`MemoryProfileStore`] for tests. All operations are live round trips;
/// nothing is cached on this side.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Anonymous sign-in producing a stable per-installation identity
    /// token. Repeated calls return the same token.
    async fn sign_in_anonymously(&self) -> Result<String, ProfileError>;

    /// Fetch the document for `uid`, or [`ProfileError::NotFound`].
    async fn fetch(&self, uid: &str) -> Result<ProfileDocument, ProfileError>;

    /// Create or fully overwrite the document for `uid`.
    async fn replace(&self, uid: &str, doc: ProfileDocument) -> Result<(), ProfileError>;

    /// Merge `patch` into the existing document for `uid`. Fails with
    /// [`ProfileError::NotFound`] when there is no document to merge into.
    async fn merge(&self, uid: &str, patch: ProfileUpdate) -> Result<(), ProfileError>;
}

/// In-process [`ProfileStore`] for tests and offline use.
///
/// Failure injection mirrors what the real service can do to us:
/// `set_offline` makes every call transiently fail, `set_deny` turns every
/// call into a permission failure.
#[derive(Default)]
pub struct MemoryProfileStore {
    docs: RwLock<HashMap<String, ProfileDocument>>,
    token: Mutex<Option<String>>,
    offline: AtomicBool,
    deny: AtomicBool,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    fn gate(&self) -> Result<(), ProfileError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProfileError::Transient("store is offline".to_string()));
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(ProfileError::PermissionDenied);
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn sign_in_anonymously(&self) -> Result<String, ProfileError> {
        self.gate().map_err(|e| match e {
            ProfileError::Transient(msg) => ProfileError::Auth(msg),
            other => other,
        })?;
        let mut token = self.token.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(token
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone())
    }

    async fn fetch(&self, uid: &str) -> Result<ProfileDocument, ProfileError> {
        self.gate()?;
        self.docs
            .read()
            .await
            .get(uid)
            .cloned()
            .ok_or(ProfileError::NotFound)
    }

    async fn replace(&self, uid: &str, doc: ProfileDocument) -> Result<(), ProfileError> {
        self.gate()?;
        self.docs.write().await.insert(uid.to_string(), doc);
        Ok(())
    }

    async fn merge(&self, uid: &str, patch: ProfileUpdate) -> Result<(), ProfileError> {
        self.gate()?;
        let mut docs = self.docs.write().await;
        let doc = docs.get_mut(uid).ok_or(ProfileError::NotFound)?;
        doc.apply(&patch);
        Ok(())
    }
}
