//! Authenticated HTTP client for the hosted backend
//!
//! Wraps reqwest::Client with API key and bearer token injection, and
//! refreshes the session when the stored access token has expired.

use anyhow::{bail, Context, Result};

use crate::auth::{Session, SessionStore};
use crate::config::Config;

/// Authenticated client for the REST, storage and realtime surfaces.
pub struct BaasClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    session: Session,
}

impl BaasClient {
    /// Load config and build client. Attempts a refresh if the session is expired.
    pub async fn new() -> Result<Self> {
        let mut config = Config::load()?;

        let needs_refresh = config
            .session()
            .map_or(true, |s| s.access_token.is_expired());
        if needs_refresh {
            let has_refresh = config
                .session()
                .and_then(|s| s.refresh_token.as_ref())
                .is_some();
            if !has_refresh {
                bail!("Not logged in or session expired. Run 'matchchat login'.");
            }
            tracing::info!("Session missing or expired, refreshing...");
            match crate::auth::password::refresh().await {
                Ok(true) => {
                    config = Config::load()?;
                    tracing::info!("Session refreshed");
                }
                Ok(false) => {
                    bail!("No refresh token available. Run 'matchchat login'.");
                }
                Err(e) => {
                    bail!("Session refresh failed: {:#}. Run 'matchchat login'.", e);
                }
            }
        }

        let session = config
            .session()
            .cloned()
            .context("No session. Run 'matchchat login' first.")?;

        Ok(Self::with_session(&config, session))
    }

    pub fn with_session(config: &Config, session: Session) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub fn access_token(&self) -> &str {
        &self.session.access_token.token
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> String {
        let base = self
            .base_url
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base,
            url::form_urlencoded::byte_serialize(self.api_key.as_bytes()).collect::<String>()
        )
    }

    /// Public URL of an object in a public storage bucket.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.session.access_token.token)
    }

    /// GET a table or view (path includes the query string).
    pub async fn rest_get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.rest_url(path);
        tracing::debug!("REST GET {}", url);

        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("REST GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST (insert) a row and ask for the stored representation back.
    pub async fn rest_post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = self.rest_url(path);
        tracing::debug!("REST POST {}", url);

        let resp = self
            .authed(self.http.post(&url))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// PATCH rows matching the filter in `path`.
    pub async fn rest_patch(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = self.rest_url(path);
        tracing::debug!("REST PATCH {}", url);

        let resp = self
            .authed(self.http.patch(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST PATCH {} failed", url))?;

        check_response(resp, &url).await
    }

    /// Call a stored procedure.
    pub async fn rpc(&self, function: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = self.rest_url(&format!("rpc/{}", function));
        tracing::debug!("RPC POST {}", url);

        let resp = self
            .authed(self.http.post(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("RPC POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// Upload bytes to object storage. Returns the public URL of the object.
    pub async fn storage_upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        tracing::debug!("Storage POST {} ({} bytes)", url, bytes.len());

        let resp = self
            .authed(self.http.post(&url))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Storage POST {} failed", url))?;

        check_response(resp, &url).await?;
        Ok(self.public_object_url(bucket, path))
    }
}

/// Check HTTP response status code and return a clear error on failure.
pub async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Session may be invalid -- run 'matchchat login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StoredToken;

    fn client(base: &str) -> BaasClient {
        let config = Config {
            backend_url: base.to_string(),
            api_key: "anon key".to_string(),
            ..Default::default()
        };
        let session = Session {
            user_id: "u1".to_string(),
            access_token: StoredToken::new("tok".to_string(), None),
            refresh_token: None,
            profile: None,
        };
        BaasClient::with_session(&config, session)
    }

    #[test]
    fn test_realtime_url_swaps_scheme_and_encodes_key() {
        let c = client("https://demo.example.com/");
        assert_eq!(
            c.realtime_url(),
            "wss://demo.example.com/realtime/v1/websocket?apikey=anon+key&vsn=1.0.0"
        );
    }

    #[test]
    fn test_rest_and_storage_urls() {
        let c = client("http://localhost:54321");
        assert_eq!(
            c.rest_url("/messages?id=eq.1"),
            "http://localhost:54321/rest/v1/messages?id=eq.1"
        );
        assert_eq!(
            c.public_object_url("voice-messages", "a/b.webm"),
            "http://localhost:54321/storage/v1/object/public/voice-messages/a/b.webm"
        );
        assert_eq!(c.user_id(), "u1");
    }
}
