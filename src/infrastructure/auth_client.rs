use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone)]
pub struct PasswordSignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub user_id: String,
    pub email: Option<String>,
}

/// Identity service issuing bearer tokens for the remote store.
#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn sign_in_with_password(
        &self,
        request: PasswordSignInRequest,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponsePayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: Option<UserPayload>,
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct UserPayload {
    id: String,
    email: Option<String>,
}

impl ReqwestAuthClient {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    fn auth_endpoint(&self, action: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Auth("auth base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push("auth");
            segments.push("v1");
            segments.push(action);
        }
        Ok(url)
    }

    async fn post_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthTokenResponse, InfraError> {
        let endpoint = self.auth_endpoint("token")?;
        let response = self
            .client
            .post(endpoint)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| InfraError::Auth(format!("network error while requesting token: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Auth(format!("failed reading token response: {error}")))?;

        let parsed = serde_json::from_str::<TokenResponsePayload>(&body).map_err(|error| {
            InfraError::Auth(format!("invalid token response payload: {error}; body={body}"))
        })?;

        if !status.is_success() || parsed.error.is_some() {
            let code = parsed.error.unwrap_or_else(|| format!("http {}", status.as_u16()));
            let detail = parsed
                .error_description
                .or(parsed.msg)
                .unwrap_or_else(|| body.clone());
            return Err(InfraError::Auth(format!("token endpoint error: {code}; {detail}")));
        }

        let access_token = parsed
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| InfraError::Auth("token response did not include access_token".to_string()))?;
        let user = parsed
            .user
            .ok_or_else(|| InfraError::Auth("token response did not include user".to_string()))?;

        Ok(AuthTokenResponse {
            access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in.unwrap_or(0).max(0),
            user_id: user.id,
            email: user.email,
        })
    }
}

#[async_trait]
impl AuthHttpClient for ReqwestAuthClient {
    async fn sign_in_with_password(
        &self,
        request: PasswordSignInRequest,
    ) -> Result<AuthTokenResponse, InfraError> {
        self.post_token(
            "password",
            serde_json::json!({
                "email": request.email,
                "password": request.password,
            }),
        )
        .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
        self.post_token(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError> {
        let endpoint = self.auth_endpoint("logout")?;
        let response = self
            .client
            .post(endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| InfraError::Auth(format!("network error while signing out: {error}")))?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::UNAUTHORIZED {
            return Err(InfraError::Auth(format!("sign out failed: http {}", status.as_u16())));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LocalAccount {
    user_id: String,
    password: String,
}

/// Identity service kept in memory; issues numbered tokens for registered
/// accounts.
#[derive(Debug, Default)]
pub struct InMemoryAuthClient {
    accounts: Mutex<HashMap<String, LocalAccount>>,
    refresh_tokens: Mutex<HashMap<String, (String, String)>>,
    next_token: AtomicU64,
    expires_in: i64,
}

impl InMemoryAuthClient {
    pub fn new(expires_in: i64) -> Self {
        Self {
            expires_in,
            ..Self::default()
        }
    }

    pub fn register(&self, email: &str, password: &str, user_id: &str) -> Result<(), InfraError> {
        self.accounts
            .lock()
            .map_err(|error| InfraError::Auth(format!("in-memory auth lock poisoned: {error}")))?
            .insert(
                email.trim().to_ascii_lowercase(),
                LocalAccount {
                    user_id: user_id.to_string(),
                    password: password.to_string(),
                },
            );
        Ok(())
    }

    fn issue(&self, user_id: &str, email: &str) -> Result<AuthTokenResponse, InfraError> {
        let sequence = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh_token = format!("refresh-{sequence}");
        self.refresh_tokens
            .lock()
            .map_err(|error| InfraError::Auth(format!("in-memory auth lock poisoned: {error}")))?
            .insert(refresh_token.clone(), (user_id.to_string(), email.to_string()));
        Ok(AuthTokenResponse {
            access_token: format!("access-{sequence}"),
            refresh_token: Some(refresh_token),
            expires_in: self.expires_in,
            user_id: user_id.to_string(),
            email: Some(email.to_string()),
        })
    }
}

#[async_trait]
impl AuthHttpClient for InMemoryAuthClient {
    async fn sign_in_with_password(
        &self,
        request: PasswordSignInRequest,
    ) -> Result<AuthTokenResponse, InfraError> {
        let email = request.email.trim().to_ascii_lowercase();
        let account = self
            .accounts
            .lock()
            .map_err(|error| InfraError::Auth(format!("in-memory auth lock poisoned: {error}")))?
            .get(&email)
            .cloned();
        match account {
            Some(account) if account.password == request.password => self.issue(&account.user_id, &email),
            _ => Err(InfraError::Auth(
                "token endpoint error: invalid_grant; Invalid login credentials".to_string(),
            )),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
        let owner = self
            .refresh_tokens
            .lock()
            .map_err(|error| InfraError::Auth(format!("in-memory auth lock poisoned: {error}")))?
            .remove(refresh_token);
        match owner {
            Some((user_id, email)) => self.issue(&user_id, &email),
            None => Err(InfraError::Auth(
                "token endpoint error: invalid_grant; Invalid Refresh Token".to_string(),
            )),
        }
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), InfraError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_endpoint_keeps_base_path() {
        let client = ReqwestAuthClient::new(
            Url::parse("https://project.example.co/").expect("url"),
            "anon-key",
        );
        assert_eq!(
            client.auth_endpoint("token").expect("endpoint").as_str(),
            "https://project.example.co/auth/v1/token"
        );
        assert_eq!(
            client.auth_endpoint("logout").expect("endpoint").as_str(),
            "https://project.example.co/auth/v1/logout"
        );
    }

    #[test]
    fn token_payload_accepts_gotrue_shape() {
        let payload: TokenResponsePayload = serde_json::from_str(
            r#"{"access_token":"a","token_type":"bearer","expires_in":3600,"refresh_token":"r","user":{"id":"u-1","email":"a@b.c"}}"#,
        )
        .expect("payload");
        assert_eq!(payload.user.map(|user| user.id).as_deref(), Some("u-1"));
        assert_eq!(payload.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn in_memory_client_checks_passwords_and_rotates_refresh_tokens() {
        let client = InMemoryAuthClient::new(3600);
        client.register("Me@Example.com", "secret", "user-1").expect("register");

        let wrong = client
            .sign_in_with_password(PasswordSignInRequest {
                email: "me@example.com".to_string(),
                password: "nope".to_string(),
            })
            .await;
        assert!(matches!(wrong, Err(InfraError::Auth(_))));

        let signed_in = client
            .sign_in_with_password(PasswordSignInRequest {
                email: " me@example.com ".to_string(),
                password: "secret".to_string(),
            })
            .await
            .expect("sign in");
        assert_eq!(signed_in.user_id, "user-1");

        let refresh_token = signed_in.refresh_token.expect("refresh token");
        let refreshed = client.refresh_session(&refresh_token).await.expect("refresh");
        assert_ne!(refreshed.access_token, signed_in.access_token);
        assert!(client.refresh_session(&refresh_token).await.is_err());
    }
}
