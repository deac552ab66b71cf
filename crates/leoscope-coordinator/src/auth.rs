//! Credential extraction and verification.
//!
//! A tower layer that resolves the `x-userid` plus `x-access-token` or
//! `x-jwt` headers into a [`CallerIdentity`] before any handler runs.
//! Handlers read the identity from request extensions and enforce their
//! own per-operation role checks. Missing or invalid credentials
//! short-circuit with 401; credentials are read exactly once per call.

use axum::http::StatusCode;
use http::{Request, Response};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

use leoscope_proto::{headers, Role, UserId};
use leoscope_store::MetaStore;

/// Resolved caller identity, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// Authenticated user id.
    pub user_id: UserId,
    /// Role attached to the credential.
    pub role: Role,
}

/// Claims carried by a signed token. `sub` must match `x-userid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: u64,
}

/// Shared state for the auth layer.
pub struct AuthState {
    /// Store used to resolve users.
    pub store: Arc<dyn MetaStore>,
    /// HS256 secret for the signed-token path; `None` disables it.
    pub jwt_secret: Option<String>,
}

/// Tower layer that authenticates every request.
#[derive(Clone)]
pub struct AuthLayer {
    state: Arc<AuthState>,
}

impl AuthLayer {
    /// Create the layer.
    #[must_use]
    pub fn new(state: Arc<AuthState>) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// The service wrapper that performs credential resolution.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    state: Arc<AuthState>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let req_headers = req.headers().clone();
            let header = |name: &str| {
                req_headers
                    .get(name)
                    .and_then(|h| h.to_str().ok())
                    .map(ToOwned::to_owned)
            };

            let Some(user_id) = header(headers::USER_ID) else {
                tracing::debug!("missing {} header", headers::USER_ID);
                return Ok(unauthenticated_response());
            };
            let access_token = header(headers::ACCESS_TOKEN);
            let jwt = header(headers::JWT);

            let user_id = UserId::new(user_id);
            let user = match state.store.get_user(&user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::debug!(user = %user_id, "unknown user");
                    return Ok(unauthenticated_response());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "user lookup failed");
                    return Ok(unauthenticated_response());
                }
            };

            let verified = match (access_token, jwt) {
                (Some(token), _) => verify_token(&token, &user.token_hash),
                (None, Some(token)) => verify_jwt(&token, user_id.as_str(), &state.jwt_secret),
                (None, None) => false,
            };

            if !verified {
                tracing::debug!(user = %user_id, "credential verification failed");
                return Ok(unauthenticated_response());
            }

            req.extensions_mut().insert(CallerIdentity {
                user_id,
                role: user.role,
            });
            inner.call(req).await
        })
    }
}

fn unauthenticated_response<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

/// Generate a fresh 32-character bearer token.
#[must_use]
pub fn generate_token() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a token, as persisted in the user record.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Constant-time comparison of a presented token against the stored hash.
#[must_use]
pub fn verify_token(token: &str, expected_hash: &str) -> bool {
    let presented = hash_token(token);
    presented.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

fn verify_jwt(token: &str, user_id: &str, secret: &Option<String>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    match decode::<Claims>(token, &key, &validation) {
        Ok(data) => data.claims.sub == user_id,
        Err(err) => {
            tracing::debug!(error = %err, "signed token validation failed");
            false
        }
    }
}
