//! Hosted backend adapter: GoTrue for identity, PostgREST for rows.
//!
//! One client serves both ports. Row requests carry the signed-in user's
//! access token so row-level security sees the right owner; without a
//! session they fall back to the anon key.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dojo_core::{NewTask, Profile, Task, TaskId, TaskPatch, UserId};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{AuthError, RemoteError};
use crate::ports::{
    AuthEvent, AuthUser, IdentityProvider, OAuthRedirect, OAuthRequest, RemoteStore, Session,
    SignUp,
};

/// Refresh this long before the access token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 30;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
/// PostgREST code for "JSON object requested, multiple (or no) rows returned".
const NO_SINGLE_ROW: &str = "PGRST116";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`.
    pub url: String,
    pub anon_key: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }
}

pub struct SupabaseClient {
    http: reqwest::Client,
    config: SupabaseConfig,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Self {
        Self::with_session(config, None)
    }

    /// Start from a session persisted by an earlier run.
    pub fn with_session(config: SupabaseConfig, session: Option<Session>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            http: reqwest::Client::new(),
            config,
            session: RwLock::new(session),
            events,
        }
    }

    /// Session as currently held, without refreshing.
    pub fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.config.url)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.config.url)
    }

    fn auth_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.auth_url(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
    }

    fn rest_request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self
            .current_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.config.anon_key.clone());
        self.http
            .request(method, self.rest_url(table))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    async fn send_auth(&self, request: RequestBuilder) -> Result<Response, AuthError> {
        let resp = request
            .send()
            .await
            .map_err(|e| AuthError::transport(e.to_string()))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(AuthError::rejected(failure_message(resp).await))
        }
    }

    async fn send_rest(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = request
            .send()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(RemoteError::rejected(failure_message(resp).await))
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let resp = self
            .send_auth(
                self.auth_request(Method::POST, "token")
                    .query(&[("grant_type", "refresh_token")])
                    .json(&json!({ "refresh_token": refresh_token })),
            )
            .await?;
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::malformed(e.to_string()))?;
        Ok(token.into_session(Utc::now()))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let resp = self
            .send_auth(
                self.http
                    .get(self.auth_url("user"))
                    .header("apikey", &self.config.anon_key)
                    .bearer_auth(access_token),
            )
            .await?;
        let user: GoTrueUser = resp
            .json()
            .await
            .map_err(|e| AuthError::malformed(e.to_string()))?;
        Ok(user.into())
    }

    fn sign_in_with(&self, session: Session) -> Session {
        self.store_session(Some(session.clone()));
        self.emit(AuthEvent::signed_in(session.clone()));
        session
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        let stale = session.is_expired(Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS));
        if !stale {
            return Ok(Some(session));
        }
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            debug!("session expired without refresh token");
            self.store_session(None);
            self.emit(AuthEvent::signed_out());
            return Ok(None);
        };

        match self.refresh(refresh_token).await {
            Ok(fresh) => {
                debug!(user_id = %fresh.user.id, "access token refreshed");
                self.store_session(Some(fresh.clone()));
                self.emit(AuthEvent::token_refreshed(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(AuthError::Rejected { message }) => {
                warn!(error = %message, "refresh token rejected; signing out");
                self.store_session(None);
                self.emit(AuthEvent::signed_out());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Option<Session>, AuthError> {
        let resp = self
            .send_auth(self.auth_request(Method::POST, "signup").json(&json!({
                "email": request.email,
                "password": request.password,
                "data": { "username": request.username },
            })))
            .await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AuthError::malformed(e.to_string()))?;

        // with confirmation on, the response is the bare user record
        if body.get("access_token").is_none() {
            return Ok(None);
        }
        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| AuthError::malformed(e.to_string()))?;
        Ok(Some(self.sign_in_with(token.into_session(Utc::now()))))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let resp = self
            .send_auth(
                self.auth_request(Method::POST, "token")
                    .query(&[("grant_type", "password")])
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::malformed(e.to_string()))?;
        Ok(self.sign_in_with(token.into_session(Utc::now())))
    }

    async fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<OAuthRedirect, AuthError> {
        let url = authorize_url(&self.config.url, request)?;
        Ok(OAuthRedirect { url })
    }

    async fn complete_oauth(&self, callback_url: &str) -> Result<Session, AuthError> {
        let params = callback_params(callback_url)?;
        let access_token = params
            .get("access_token")
            .cloned()
            .ok_or_else(|| AuthError::callback("no access_token in callback"))?;
        let expires_at = params
            .get("expires_at")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                params
                    .get("expires_in")
                    .and_then(|v| v.parse::<i64>().ok())
                    .map(|secs| Utc::now() + Duration::seconds(secs))
            });

        let user = self.fetch_user(&access_token).await?;
        Ok(self.sign_in_with(Session {
            access_token,
            refresh_token: params.get("refresh_token").cloned(),
            expires_at,
            user,
        }))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.current_session() {
            let request = self
                .http
                .post(self.auth_url("logout"))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(&session.access_token);
            // the local session goes regardless; a dead token is already signed out
            if let Err(err) = self.send_auth(request).await {
                warn!(error = %err, "remote sign-out failed");
            }
        }
        self.store_session(None);
        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    async fn list_tasks(&self, owner: &UserId) -> Result<Vec<Task>, RemoteError> {
        let resp = self
            .send_rest(self.rest_request(Method::GET, "tasks").query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{owner}")),
                ("order", "start_time.asc".to_string()),
            ]))
            .await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::malformed(e.to_string()))
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, RemoteError> {
        let resp = self
            .send_rest(
                self.rest_request(Method::POST, "tasks")
                    .header("Prefer", "return=representation")
                    .header(ACCEPT, HeaderValue::from_static(SINGLE_OBJECT))
                    .json(task),
            )
            .await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::malformed(e.to_string()))
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError> {
        self.send_rest(
            self.rest_request(Method::PATCH, "tasks")
                .query(&[("id", format!("eq.{id}"))])
                .json(patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), RemoteError> {
        self.send_rest(
            self.rest_request(Method::DELETE, "tasks")
                .query(&[("id", format!("eq.{id}"))]),
        )
        .await?;
        Ok(())
    }

    async fn fetch_profile(&self, id: &UserId) -> Result<Profile, RemoteError> {
        let resp = self
            .rest_request(Method::GET, "profiles")
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))])
            .header(ACCEPT, HeaderValue::from_static(SINGLE_OBJECT))
            .send()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains(NO_SINGLE_ROW) {
                return Err(RemoteError::not_found(format!("profile {id}")));
            }
            return Err(RemoteError::rejected(
                error_message(&body).unwrap_or_else(|| "profile lookup failed".to_string()),
            ));
        }
        resp.json()
            .await
            .map_err(|e| RemoteError::malformed(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    username: Option<String>,
    full_name: Option<String>,
}

impl From<GoTrueUser> for AuthUser {
    fn from(user: GoTrueUser) -> Self {
        let UserMetadata { username, full_name } = user.user_metadata;
        AuthUser {
            id: UserId::new(user.id),
            email: user.email,
            username: username.or(full_name),
        }
    }
}

fn authorize_url(base: &str, request: &OAuthRequest) -> Result<String, AuthError> {
    let mut url = Url::parse(&format!("{base}/auth/v1/authorize"))
        .map_err(|e| AuthError::malformed(format!("bad project url: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("provider", request.provider.as_str());
        if let Some(redirect) = &request.redirect_to {
            query.append_pair("redirect_to", redirect);
        }
        for (key, value) in &request.query_params {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}

/// Parameters of an OAuth redirect, taken from the fragment (implicit flow)
/// or else the query string. A provider-reported error becomes the failure.
fn callback_params(callback_url: &str) -> Result<HashMap<String, String>, AuthError> {
    let url = Url::parse(callback_url.trim())
        .map_err(|e| AuthError::callback(format!("not a URL: {e}")))?;

    let params: HashMap<String, String> = match url.fragment().filter(|f| !f.is_empty()) {
        Some(fragment) => {
            // reuse the query parser on the fragment
            let mut scratch = Url::parse("http://callback.invalid/")
                .map_err(|e| AuthError::callback(e.to_string()))?;
            scratch.set_query(Some(fragment));
            scratch.query_pairs().into_owned().collect()
        }
        None => url.query_pairs().into_owned().collect(),
    };

    if let Some(message) = params
        .get("error_description")
        .or_else(|| params.get("error"))
    {
        return Err(AuthError::callback(message.clone()));
    }
    Ok(params)
}

async fn failure_message(resp: Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    error_message(&body).unwrap_or_else(|| format!("request failed with status {status}"))
}

/// Human message out of a GoTrue or PostgREST error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
