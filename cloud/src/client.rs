use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use nourish_core::profile::{ProfileDocument, ProfileError, ProfileStore, ProfileUpdate};

/// Client for the profile document service.
///
/// One logical collection of uid-keyed documents:
/// `POST {base}/v1/auth/anonymous` mints an identity, and
/// `GET`/`PUT`/`PATCH {base}/v1/users/{uid}` read, replace, and merge the
/// profile document. `PATCH` carries only the supplied fields.
pub struct HttpProfileStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProfileStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_api_key(base_url, None)
    }

    #[must_use]
    pub fn with_api_key(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "nourish-cloud/{} (nutrition tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    fn user_url(&self, uid: &str) -> String {
        format!("{}/v1/users/{uid}", self.base_url)
    }
}

#[derive(Deserialize)]
struct SignInResponse {
    uid: String,
}

fn transport_error(err: &reqwest::Error) -> ProfileError {
    ProfileError::Transient(err.to_string())
}

/// Map a non-success response to the typed taxonomy, folding the service's
/// JSON error body (if any) into the message.
async fn status_error(resp: reqwest::Response) -> ProfileError {
    let status = resp.status();
    match status {
        StatusCode::NOT_FOUND => ProfileError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProfileError::PermissionDenied,
        _ => {
            let detail = error_body(resp)
                .await
                .unwrap_or_else(|| format!("profile service returned {status}"));
            tracing::warn!(%status, detail, "profile service request failed");
            ProfileError::Transient(detail)
        }
    }
}

async fn error_body(resp: reqwest::Response) -> Option<String> {
    let body: serde_json::Value = resp.json().await.ok()?;
    body.get("error")?.as_str().map(ToString::to_string)
}

#[async_trait]
impl ProfileStore for HttpProfileStore {
    async fn sign_in_anonymously(&self) -> Result<String, ProfileError> {
        let url = format!("{}/v1/auth/anonymous", self.base_url);
        let resp = self
            .request(Method::POST, url)
            .send()
            .await
            .map_err(|e| ProfileError::Auth(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = error_body(resp)
                .await
                .unwrap_or_else(|| format!("sign-in failed with {status}"));
            tracing::warn!(%status, detail, "anonymous sign-in rejected");
            return Err(ProfileError::Auth(detail));
        }

        let body: SignInResponse = resp
            .json()
            .await
            .map_err(|e| ProfileError::Auth(format!("malformed sign-in response: {e}")))?;
        Ok(body.uid)
    }

    async fn fetch(&self, uid: &str) -> Result<ProfileDocument, ProfileError> {
        let resp = self
            .request(Method::GET, self.user_url(uid))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        resp.json()
            .await
            .map_err(|e| ProfileError::Transient(format!("malformed profile document: {e}")))
    }

    async fn replace(&self, uid: &str, doc: ProfileDocument) -> Result<(), ProfileError> {
        let resp = self
            .request(Method::PUT, self.user_url(uid))
            .json(&doc)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }

    async fn merge(&self, uid: &str, patch: ProfileUpdate) -> Result<(), ProfileError> {
        let resp = self
            .request(Method::PATCH, self.user_url(uid))
            .json(&patch)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }
}
