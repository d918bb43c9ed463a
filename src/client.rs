/// Client-side token manager.
///
/// Holds the current token pair, hands out the access token while it is
/// comfortably inside its lifetime, and refreshes through the rotation
/// endpoint when it is not. Refreshes are serialized: the state lock is
/// held across the network call, so concurrent callers queue up and reuse
/// the one in-flight result instead of racing the single-use refresh token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    access_expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    /// The access token, if it is valid beyond the expiry buffer.
    fn fresh_access_token(&self, buffer: Duration) -> Option<String> {
        let token = self.access_token.as_ref()?;
        let expires_at = self.access_expires_at?;
        if Utc::now() + buffer < expires_at {
            Some(token.clone())
        } else {
            None
        }
    }

    fn install(&mut self, access: String, refresh: String, expires_in: i64) {
        self.access_token = Some(access);
        self.refresh_token = Some(refresh);
        self.access_expires_at = Some(Utc::now() + Duration::seconds(expires_in));
    }

    fn clear(&mut self) {
        *self = TokenState::default();
    }
}

pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    expiry_buffer: Duration,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(base_url: String, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url,
            expiry_buffer: Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS),
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Store a freshly issued pair (login or registration response).
    pub async fn set_session(&self, access_token: String, refresh_token: String, expires_in: i64) {
        let mut state = self.state.lock().await;
        state.install(access_token, refresh_token, expires_in);
    }

    /// Drop all stored tokens.
    pub async fn clear_session(&self) {
        let mut state = self.state.lock().await;
        state.clear();
    }

    /// Return an access token valid beyond the expiry buffer, refreshing if
    /// needed. `None` when no session exists or the refresh fails.
    ///
    /// Callers that arrive while a refresh is in flight park on the state
    /// lock; when they get it, the re-check sees the refreshed token, so at
    /// most one network call happens per expiry window.
    pub async fn get_valid_access_token(&self) -> Option<String> {
        let mut state = self.state.lock().await;

        if let Some(token) = state.fresh_access_token(self.expiry_buffer) {
            return Some(token);
        }

        match self.refresh_locked(&mut state).await {
            Ok(()) => state.access_token.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed");
                None
            }
        }
    }

    /// Exchange the stored refresh token for a new pair. Must be called with
    /// the state lock held. A failed exchange clears the session: the
    /// presented token was consumed or rejected and will not work twice.
    async fn refresh_locked(&self, state: &mut TokenState) -> Result<(), String> {
        let refresh_token = state
            .refresh_token
            .clone()
            .ok_or_else(|| "no session".to_string())?;

        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| format!("refresh request failed: {}", e))?;

        if !response.status().is_success() {
            state.clear();
            return Err(format!("refresh rejected with status {}", response.status()));
        }

        let pair: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed refresh response: {}", e))?;

        state.install(pair.access_token, pair.refresh_token, pair.expires_in);
        Ok(())
    }

    /// Perform an authenticated request. On a 401 the manager refreshes and
    /// retries exactly once; a second 401 is returned to the caller.
    pub async fn fetch_with_auth(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.request(method.clone(), &url);
        if let Some(token) = self.get_valid_access_token().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // One forced refresh, one retry. No loop.
        let retry_token = {
            let mut state = self.state.lock().await;
            match self.refresh_locked(&mut state).await {
                Ok(()) => state.access_token.clone(),
                Err(e) => {
                    tracing::warn!(error = %e, "Retry refresh failed");
                    None
                }
            }
        };

        let mut retry = self.http.request(method, &url);
        if let Some(token) = retry_token {
            retry = retry.bearer_auth(token);
        }
        retry.send().await
    }
}

/// Decode a JWT payload without verifying the signature.
///
/// Display-only: the result is whatever the token says about itself, and
/// must never feed an authorization decision. Those belong to the server.
pub fn decode_claims_unverified(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unsigned_token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        format!("{}.{}.signature-not-checked", header, body)
    }

    #[test]
    fn decodes_payload_without_verification() {
        let token = unsigned_token(serde_json::json!({
            "sub": "42", "email": "u@example.com", "role": "member"
        }));

        let claims = decode_claims_unverified(&token).expect("should decode");
        assert_eq!(claims["email"], "u@example.com");
        assert_eq!(claims["role"], "member");
    }

    #[test]
    fn decode_tolerates_garbage() {
        assert!(decode_claims_unverified("").is_none());
        assert!(decode_claims_unverified("a.b").is_none());
        assert!(decode_claims_unverified("one-part-only").is_none());
        assert!(decode_claims_unverified("x.!!!not-base64!!!.y").is_none());
    }

    #[test]
    fn fresh_token_respects_expiry_buffer() {
        let mut state = TokenState::default();
        let buffer = Duration::seconds(60);

        // 15 minutes out: fine.
        state.install("tok".to_string(), "ref".to_string(), 900);
        assert!(state.fresh_access_token(buffer).is_some());

        // 30 seconds out: inside the buffer, treated as stale.
        state.install("tok".to_string(), "ref".to_string(), 30);
        assert!(state.fresh_access_token(buffer).is_none());

        state.clear();
        assert!(state.fresh_access_token(buffer).is_none());
    }

    /// Minimal HTTP stub that counts hits and answers every request with the
    /// same freshly minted pair. One request per connection.
    async fn spawn_counting_refresh_stub() -> (String, std::sync::Arc<AtomicUsize>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = std::sync::Arc::new(AtomicUsize::new(0));

        let server_hits = hits.clone();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                server_hits.fetch_add(1, Ordering::SeqCst);

                // Drain headers plus the JSON body before answering.
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                let header_end = loop {
                    if let Some(pos) = buf[..read].windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break read,
                        Ok(n) => read += n,
                    }
                };
                let content_length = String::from_utf8_lossy(&buf[..header_end])
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                while read < header_end + content_length {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read += n,
                    }
                }

                let body = r#"{"access_token":"rotated-access","refresh_token":"rotated-refresh","expires_in":900}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.ok();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_refresh_call() {
        let (base_url, hits) = spawn_counting_refresh_stub().await;

        let manager = std::sync::Arc::new(TokenManager::new(base_url, reqwest::Client::new()));
        manager
            .set_session("stale".to_string(), "refresh".to_string(), 0)
            .await;

        // Everyone arrives with a stale access token. The first caller holds
        // the lock across the network call; the rest park on it and find the
        // refreshed token on re-check.
        let mut handles = Vec::new();
        for _ in 0..5 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move { m.get_valid_access_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("rotated-access"));
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1, "exactly one refresh request");
    }

    #[tokio::test]
    async fn connect_failure_keeps_the_session_for_retry() {
        // No server behind it: the refresh attempt fails with a connect
        // error, which is retryable, so the refresh token must survive.
        let manager = TokenManager::new("http://127.0.0.1:1".to_string(), reqwest::Client::new());
        manager
            .set_session("stale".to_string(), "refresh".to_string(), 0)
            .await;

        assert!(manager.get_valid_access_token().await.is_none());

        let state = manager.state.lock().await;
        assert_eq!(state.refresh_token.as_deref(), Some("refresh"));
    }
}
