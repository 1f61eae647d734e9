use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use rolodex_core::{ErrorKind, Person, Session, User};
use rolodex_storage::{CredentialHasher, Database};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Header carrying the session token.
pub const TOKEN_HEADER: &str = "x-auth-token";

// ---------------------------------------------------------------------------
// Shared state passed to handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    /// Lifetime of sessions issued by `/api/login`
    pub session_ttl: Duration,
}

pub fn router(state: AppState, public_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/api/logout", post(handle_logout))
        // People
        .route("/api/person", get(handle_people_list).post(handle_person_create))
        .route("/api/person/search", get(handle_people_search))
        .route(
            "/api/person/:id",
            get(handle_person_get).put(handle_person_update).delete(handle_person_delete),
        )
        // Users
        .route("/api/user", get(handle_users_list).post(handle_user_create))
        .route("/api/user/login/:login", get(handle_user_by_login))
        .route(
            "/api/user/:id",
            get(handle_user_get).put(handle_user_update).delete(handle_user_delete),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        // Login is the only public API route
        .route("/api/login", post(handle_login))
        .with_state(state);

    if let Some(dir) = public_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<rolodex_core::Error> for ApiError {
    fn from(e: rolodex_core::Error) -> Self {
        let status = match e.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::StorageUnavailable | ErrorKind::Randomness | ErrorKind::Internal => {
                error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Run a storage call on the blocking pool.
async fn with_db<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&dyn Database) -> rolodex_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Session token authentication middleware
// ---------------------------------------------------------------------------

async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = match req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return ApiError::unauthorized("missing session token").into_response(),
    };

    let session = match with_db(&state, move |db| db.find_session(&token)).await {
        Ok(s) => s,
        Err(e) if e.status == StatusCode::NOT_FOUND => {
            return ApiError::unauthorized("invalid session token").into_response()
        }
        Err(e) => return e.into_response(),
    };

    // The sweeper may not have run yet.
    if session.is_expired(Utc::now()) {
        debug!(user = %session.user, "Rejected expired session");
        return ApiError::unauthorized("session expired").into_response();
    }

    req.extensions_mut().insert(session);
    next.run(req).await
}

async fn require_admin(state: &AppState, session: &Session) -> ApiResult<()> {
    let login = session.user.clone();
    match with_db(state, move |db| db.find_user_by_login(&login)).await {
        Ok(user) if user.admin => Ok(()),
        Ok(_) => Err(ApiError::new(StatusCode::FORBIDDEN, "admin rights required")),
        Err(e) if e.status == StatusCode::NOT_FOUND => {
            Err(ApiError::new(StatusCode::FORBIDDEN, "admin rights required"))
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Login / logout
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user: User,
    valid_until: DateTime<Utc>,
}

async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let ttl = state.session_ttl;
    let login = req.login.clone();

    // Unknown login and wrong password look the same to the caller.
    let issued = with_db(&state, move |db| {
        let user = match db.find_user_by_login(&req.login) {
            Ok(u) => u,
            Err(e) if e.is_not_found() => {
                db.hasher().verify_unknown(&req.password);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if !CredentialHasher::verify(&user.password_hash, &req.password) {
            return Ok(None);
        }
        let session = db.issue_session(&user.login, ttl)?;
        Ok(Some((user, session)))
    })
    .await?;

    match issued {
        Some((user, session)) => {
            info!(login = %user.login, valid_until = %session.valid_until, "Login");
            Ok(Json(LoginResponse {
                token: session.token,
                user,
                valid_until: session.valid_until,
            }))
        }
        None => {
            warn!(login = %login, "Login failed");
            Err(ApiError::unauthorized("invalid login or password"))
        }
    }
}

async fn handle_logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Value>> {
    let login = session.user.clone();
    with_db(&state, move |db| db.invalidate(&session)).await?;
    info!(login = %login, "Logout");
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// People
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn handle_people_list(State(state): State<AppState>) -> ApiResult<Json<Vec<Person>>> {
    Ok(Json(with_db(&state, |db| db.list_people()).await?))
}

async fn handle_people_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Person>>> {
    Ok(Json(with_db(&state, move |db| db.fuzzy_find_people(&query.q)).await?))
}

async fn handle_person_create(
    State(state): State<AppState>,
    Json(mut person): Json<Person>,
) -> ApiResult<(StatusCode, Json<Person>)> {
    let now = Utc::now();
    person.id = 0;
    person.version = 0;
    person.created_at = now;
    person.changed_at = now;

    let stored = with_db(&state, move |db| db.insert_person(person)).await?;
    info!(id = stored.id, "Person created");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn handle_person_get(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<Person>> {
    Ok(Json(with_db(&state, move |db| db.find_person(id)).await?))
}

async fn handle_person_update(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(mut person): Json<Person>,
) -> ApiResult<Json<Person>> {
    person.id = id;
    Ok(Json(with_db(&state, move |db| db.update_person(person)).await?))
}

async fn handle_person_delete(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<Value>> {
    with_db(&state, move |db| db.delete_person(id)).await?;
    info!(id, "Person deleted");
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Fields an update may change; everything else is kept from the stored user.
#[derive(Deserialize)]
struct UserUpdate {
    login: Option<String>,
    admin: Option<bool>,
    password: Option<String>,
    version: i64,
}

async fn handle_users_list(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(with_db(&state, |db| db.list_users()).await?))
}

async fn handle_user_get(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<User>> {
    Ok(Json(with_db(&state, move |db| db.find_user(id)).await?))
}

async fn handle_user_by_login(
    State(state): State<AppState>,
    AxumPath(login): AxumPath<String>,
) -> ApiResult<Json<User>> {
    Ok(Json(with_db(&state, move |db| db.find_user_by_login(&login)).await?))
}

async fn handle_user_create(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(mut user): Json<User>,
) -> ApiResult<(StatusCode, Json<User>)> {
    require_admin(&state, &session).await?;

    let now = Utc::now();
    user.id = 0;
    user.version = 0;
    user.created_at = now;
    user.changed_at = now;

    let stored = with_db(&state, move |db| db.insert_user(user)).await?;
    info!(id = stored.id, login = %stored.login, by = %session.user, "User created");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn handle_user_update(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    AxumPath(id): AxumPath<i64>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    require_admin(&state, &session).await?;

    let stored = with_db(&state, move |db| {
        // Same answer as a stale version, as for people.
        let mut user = match db.find_user(id) {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                return Err(rolodex_core::Error::Conflict(format!(
                    "user {} was changed by someone else or no longer exists (submitted version {})",
                    id, update.version
                )))
            }
            Err(e) => return Err(e),
        };
        if let Some(login) = update.login {
            user.login = login;
        }
        if let Some(admin) = update.admin {
            user.admin = admin;
        }
        user.password = update.password;
        user.version = update.version;
        db.update_user(user)
    })
    .await?;
    info!(id = stored.id, by = %session.user, "User updated");
    Ok(Json(stored))
}

async fn handle_user_delete(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &session).await?;
    with_db(&state, move |db| db.delete_user(id)).await?;
    info!(id, by = %session.user, "User deleted");
    Ok(Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex_storage::MemoryDatabase;
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new(CredentialHasher::weak()));
        let mut admin = User::new("admin", "geheim");
        admin.admin = true;
        db.insert_user(admin).unwrap();
        db.insert_user(User::new("user", "secret")).unwrap();

        let state = AppState {
            db: db.clone(),
            session_ttl: Duration::from_secs(300),
        };
        (router(state, None), db)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header(TOKEN_HEADER, t);
        }
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn login(app: &Router, login: &str, password: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/login",
            None,
            Some(json!({ "login": login, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let (app, _db) = setup();
        let (status, body) = send(
            &app,
            "POST",
            "/api/login",
            None,
            Some(json!({ "login": "admin", "password": "geheim" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["login"], "admin");
        assert_eq!(body["user"]["admin"], true);
        assert!(body["user"].get("password_hash").is_none());
        assert!(body["user"].get("password").is_none());
        assert!(body["valid_until"].is_string());
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "GET", "/api/person", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, _) = send(&app, "POST", "/api/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "GET", "/api/person", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let (app, _db) = setup();
        let (wrong_pw, body1) = send(
            &app,
            "POST",
            "/api/login",
            None,
            Some(json!({ "login": "admin", "password": "wrong" })),
        )
        .await;
        let (unknown, body2) = send(
            &app,
            "POST",
            "/api/login",
            None,
            Some(json!({ "login": "nobody", "password": "geheim" })),
        )
        .await;
        assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown, StatusCode::UNAUTHORIZED);
        assert_eq!(body1, body2);
    }

    #[tokio::test]
    async fn test_token_required() {
        let (app, _db) = setup();
        let (status, _) = send(&app, "GET", "/api/person", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "GET", "/api/person", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "GET", "/api/user", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let (app, db) = setup();
        let session = db.issue_session("admin", Duration::ZERO).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (status, body) = send(&app, "GET", "/api/person", Some(&session.token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "session expired");
    }

    #[tokio::test]
    async fn test_person_lifecycle() {
        let (app, _db) = setup();
        let token = login(&app, "user", "secret").await;
        let t = Some(token.as_str());

        let (status, created) = send(
            &app,
            "POST",
            "/api/person",
            t,
            Some(json!({ "name": "Tamara Skibicki", "id": 99, "version": 7 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["version"], 1);
        let id = created["id"].as_i64().unwrap();
        assert_ne!(id, 99);

        let (status, got) = send(&app, "GET", &format!("/api/person/{}", id), t, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(got, created);

        let mut edit = created.clone();
        edit["phone_numbers"] = json!([{ "type": "mobile", "number": "+49-077-1634655" }]);
        let (status, updated) = send(&app, "PUT", &format!("/api/person/{}", id), t, Some(edit.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["version"], 2);
        assert_eq!(updated["phone_numbers"][0]["type"], "mobile");

        let (status, _) = send(&app, "PUT", &format!("/api/person/{}", id), t, Some(edit)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, found) = send(&app, "GET", "/api/person/search?q=skib", t, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "DELETE", &format!("/api/person/{}", id), t, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, _) = send(&app, "GET", &format!("/api/person/{}", id), t, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &format!("/api/person/{}", id), t, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_person_validation() {
        let (app, _db) = setup();
        let token = login(&app, "user", "secret").await;
        let (status, body) = send(&app, "POST", "/api/person", Some(&token), Some(json!({ "name": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_user_writes_need_admin() {
        let (app, _db) = setup();
        let new_user = json!({ "login": "carla", "password": "pw" });

        let user_token = login(&app, "user", "secret").await;
        let (status, _) = send(&app, "POST", "/api/user", Some(&user_token), Some(new_user.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, users) = send(&app, "GET", "/api/user", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 2);

        let admin_token = login(&app, "admin", "geheim").await;
        let a = Some(admin_token.as_str());
        let (status, created) = send(&app, "POST", "/api/user", a, Some(new_user.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.get("password").is_none());
        login(&app, "carla", "pw").await;

        let (status, _) = send(&app, "POST", "/api/user", a, Some(new_user)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let id = created["id"].as_i64().unwrap();
        let (status, updated) = send(
            &app,
            "PUT",
            &format!("/api/user/{}", id),
            a,
            Some(json!({ "admin": true, "version": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["admin"], true);
        assert_eq!(updated["version"], 2);
        // Password untouched by an update without one.
        login(&app, "carla", "pw").await;

        let (status, by_login) = send(&app, "GET", "/api/user/login/carla", a, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_login["id"], id);

        let (status, _) = send(&app, "DELETE", &format!("/api/user/{}", id), a, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &format!("/api/user/{}", id), a, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_of_missing_record_is_conflict() {
        let (app, _db) = setup();
        let admin_token = login(&app, "admin", "geheim").await;
        let a = Some(admin_token.as_str());

        let (status, body) = send(&app, "PUT", "/api/user/999", a, Some(json!({ "admin": true, "version": 1 }))).await;
        assert_eq!(status, StatusCode::CONFLICT, "{}", body);

        let (status, body) = send(&app, "PUT", "/api/person/999", a, Some(json!({ "name": "Ghost", "version": 1 }))).await;
        assert_eq!(status, StatusCode::CONFLICT, "{}", body);

        let (status, users) = send(&app, "GET", "/api/user", a, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 2);
    }
}
