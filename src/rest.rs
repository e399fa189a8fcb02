//! REST API layer using Axum
//!
//! Routes, shared state and the two auth gates:
//! - public: health, contact form (rate limited), public content listings;
//! - bearer token: the JSON admin API (contacts, products, incentives, uploads);
//! - HTTP Basic: the server-rendered contact table and its CSV export.
//!
//! Anything not routed falls through to the uploads directory and the
//! static frontend.

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::auth::{
    basic_credentials, load_or_create_secret, AdminCredential, CredentialError, IssuedToken,
    TokenAuthority,
};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{Incentive, Product};
use crate::notify::{Notifications, NotifyError};
use crate::ratelimit::{self, RateLimiter};
use crate::storage::{Page, StoreError, Stores};
use crate::validation::{clean_str, lenient_string};

pub mod admin_page;
pub mod contacts;
pub mod content;
pub mod upload;

pub const JSON_BODY_LIMIT: usize = 200 * 1024;

#[derive(Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("Cannot create directory {}: {source}", path.display())]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    pub tokens: TokenAuthority,
    pub admin: AdminCredential,
    pub notifications: Notifications,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Opens the stores, resolves the token secret and admin credential, and
    /// wires the notification channels from `config`.
    pub async fn init(config: Config) -> Result<Arc<Self>, InitError> {
        for dir in [&config.data_dir, &config.uploads_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| InitError::Dir {
                    path: dir.clone(),
                    source,
                })?;
        }

        let stores = Stores::open(&config.data_dir).await?;
        let secret = load_or_create_secret(config.token_secret.as_deref(), &config.data_dir).await?;
        let tokens = TokenAuthority::new(secret, config.token_ttl);
        let admin =
            AdminCredential::load_or_bootstrap(&config.data_dir, &config.admin_user, &config.admin_pass)
                .await?;
        let notifications = Notifications::from_config(&config)?;

        Ok(Self::new(config, stores, tokens, admin, notifications))
    }

    pub fn new(
        config: Config,
        stores: Stores,
        tokens: TokenAuthority,
        admin: AdminCredential,
        notifications: Notifications,
    ) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window,
            config.trust_proxy,
        ));
        Arc::new(Self {
            config,
            stores,
            tokens,
            admin,
            notifications,
            limiter,
        })
    }
}

// --- Response bodies shared by the handlers ---

#[derive(Serialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct Created {
    pub ok: bool,
    pub id: u64,
}

#[derive(Serialize)]
pub struct Deleted {
    pub ok: bool,
    pub deleted: usize,
}

#[derive(Serialize)]
pub struct Rows<R> {
    pub ok: bool,
    pub rows: Vec<R>,
}

#[derive(Serialize)]
pub struct Row<R> {
    pub ok: bool,
    pub row: R,
}

#[derive(Serialize)]
pub struct Paged<R> {
    pub ok: bool,
    #[serde(flatten)]
    pub page: Page<R>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub issued: IssuedToken,
}

/// Path ids are positive integers; anything else is a 400.
pub fn parse_id(raw: &str) -> Result<u64, ApiError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::BadRequest("Bad request".into())),
    }
}

/// `Json<T>` whose rejections (bad syntax, wrong content type, mismatched
/// fields) render as [`ApiError`] like every other failure.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

// --- Auth middleware ---

async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let session = state.tokens.authenticate(auth_header).map_err(|e| {
        tracing::debug!(reason = %e, path = %req.uri().path(), "token rejected");
        e
    })?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

fn basic_challenge(message: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"Admin\"")],
        message,
    )
        .into_response()
}

async fn require_basic(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let credentials = basic_credentials(
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    );
    let Some((user, pass)) = credentials else {
        return basic_challenge("Auth required");
    };

    if !state.admin.check(user, pass).await {
        tracing::warn!(path = %req.uri().path(), "admin page: invalid credentials");
        return basic_challenge("Invalid credentials");
    }
    next.run(req).await
}

// --- Router ---

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

fn security_header(name: &'static str, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        HeaderName::from_static(name),
        HeaderValue::from_static(value),
    )
}

/// Create Axum router with every endpoint of the site.
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.upload_max_bytes.saturating_add(64 * 1024);

    let token_routes = Router::new()
        .route("/api/admin/logout", post(logout_handler))
        .route("/api/admin/contatti", get(contacts::list_contacts))
        .route(
            "/api/admin/contatti/:id",
            get(contacts::get_contact).delete(contacts::delete_contact),
        )
        .route(
            "/api/admin/prodotti",
            get(content::list::<Product>).post(content::create::<Product>),
        )
        .route(
            "/api/admin/prodotti/:id",
            get(content::get::<Product>)
                .put(content::update::<Product>)
                .delete(content::delete::<Product>),
        )
        .route(
            "/api/admin/incentivi",
            get(content::list::<Incentive>).post(content::create::<Incentive>),
        )
        .route(
            "/api/admin/incentivi/:id",
            get(content::get::<Incentive>)
                .put(content::update::<Incentive>)
                .delete(content::delete::<Incentive>),
        )
        .route(
            "/api/admin/upload",
            post(upload::upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let limited_routes = Router::new()
        .route("/api/contatti", post(contacts::create_contact))
        .route("/api/admin/login", post(login_handler))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            ratelimit::enforce,
        ));

    let basic_routes = Router::new()
        .route("/admin", get(admin_page::contacts_page))
        .route("/admin/delete", post(admin_page::delete_contact))
        .route("/admin/export.csv", get(admin_page::export_csv))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic));

    let cache_control = if state.config.production {
        "public, max-age=2592000"
    } else {
        "public, max-age=0"
    };
    let uploads = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        ))
        .service(ServeDir::new(&state.config.uploads_dir));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/public/prodotti", get(content::public_list::<Product>))
        .route("/api/public/incentivi", get(content::public_list::<Incentive>))
        .merge(limited_routes)
        .merge(token_routes)
        .merge(basic_routes)
        .nest_service("/uploads", uploads)
        .fallback_service(ServeDir::new(&state.config.frontend_dir))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(security_header("x-content-type-options", "nosniff"))
        .layer(security_header("x-frame-options", "SAMEORIGIN"))
        .layer(security_header("referrer-policy", "no-referrer"))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = clean_str(payload.username.as_deref(), 80);
    let pass = clean_str(payload.password.as_deref(), 160);

    if !state.admin.check(user.clone(), pass).await {
        tracing::warn!(user = %user, "admin login failed");
        return Err(ApiError::Unauthorized("Credenziali non valide".into()));
    }

    let issued = state.tokens.issue(&user);
    tracing::info!(user = %user, expires_at = issued.expires_at, "admin login");
    Ok(Json(LoginResponse { ok: true, issued }))
}

/// Tokens are stateless: logging out is the client dropping its token.
async fn logout_handler() -> Json<Ack> {
    Json(Ack { ok: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_id("12").unwrap(), 12);
        assert!(parse_id("0").is_err());
        assert!(parse_id("-3").is_err());
        assert!(parse_id("abc").is_err());
    }

    #[test]
    fn login_response_flattens_token() {
        let body = LoginResponse {
            ok: true,
            issued: IssuedToken {
                token: "p.s".into(),
                expires_at: 5,
            },
        };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "token": "p.s", "expiresAt": 5}));
    }
}
