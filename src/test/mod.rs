//! Shared fixtures for the in-crate tests.

use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{Method, StatusCode, header},
    response::Response,
};
use axum_extra::extract::cookie::Key;
use chrono::Utc;
use diesel::{
    SqliteConnection,
    prelude::*,
    r2d2::{ConnectionManager, Pool},
};
use diesel_migrations::MigrationHarness;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    MIGRATIONS,
    auth::{Role, User, hash_password},
    config::create_app,
    groups::{Group, change_group},
    presentations::{NewPresentation, Presentation},
    schema::{group_members, users},
    state::{AppState, DbPool},
    storage::ObjectStore,
};

mod portal_workload;

pub fn test_conn() -> SqliteConnection {
    let mut conn = SqliteConnection::establish(":memory:").unwrap();
    conn.run_pending_migrations(MIGRATIONS).unwrap();
    conn
}

/// Inserts a user with first name "First" and no password, optionally as a
/// member of `group`. Returns the new id.
pub fn insert_user(
    conn: &mut SqliteConnection,
    name: &str,
    role: Role,
    group: Option<&str>,
) -> String {
    let user = User::create(name, "First", None, role, "RESETME1", conn).unwrap();
    if let Some(group) = group {
        // staff cannot be assigned through `change_group`
        diesel::insert_into(group_members::table)
            .values((
                group_members::id.eq(Uuid::now_v7().to_string()),
                group_members::user_id.eq(&user.id),
                group_members::group_id.eq(group),
                group_members::created_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .unwrap();
    }
    user.id
}

/// Like [`insert_user`], but the user can sign in with `password`.
pub fn insert_user_with_password(
    conn: &mut SqliteConnection,
    name: &str,
    role: Role,
    group: Option<&str>,
    password: &str,
) -> String {
    let id = insert_user(conn, name, role, None);
    diesel::update(users::table.find(&id))
        .set((
            users::password_hash.eq(Some(hash_password(password).unwrap())),
            users::reset_password.eq(None::<String>),
        ))
        .execute(conn)
        .unwrap();
    if let Some(group) = group {
        change_group(&id, Some(group), conn).unwrap();
    }
    id
}

pub fn insert_group(conn: &mut SqliteConnection, name: &str) -> String {
    Group::create(name, conn).unwrap().id
}

pub fn insert_presentation(
    conn: &mut SqliteConnection,
    group_id: &str,
    title: &str,
) -> String {
    Presentation::insert(
        NewPresentation {
            title,
            description: None,
            group_id,
            file: None,
        },
        conn,
    )
    .unwrap()
    .id
}

/// The whole application over an in-memory database, driven one request at
/// a time.
pub struct TestApp {
    pub app: Router,
    pub pool: DbPool,
    _storage: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let pool: DbPool = Pool::builder()
            .max_size(1)
            .build(ConnectionManager::<SqliteConnection>::new(":memory:"))
            .unwrap();
        pool.get().unwrap().run_pending_migrations(MIGRATIONS).unwrap();

        let storage = TempDir::new().unwrap();
        let app = create_app(AppState {
            pool: pool.clone(),
            key: Key::generate(),
            storage: ObjectStore::new(storage.path()),
        });

        Self {
            app,
            pool,
            _storage: storage,
        }
    }

    /// Runs `f` on the (only) pooled connection. The connection goes back to
    /// the pool before any request is made.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> T) -> T {
        let mut conn = self.pool.get().unwrap();
        f(&mut conn)
    }

    pub async fn send(&self, req: Request) -> Response {
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value, Option<String>) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = self.send(req).await;
        let status = res.status();
        let cookie = session_cookie(&res);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(
                    String::from_utf8_lossy(&bytes).to_string(),
                )
            })
        };

        (status, value, cookie)
    }

    /// Signs in and returns the session cookie.
    pub async fn login(&self, name: &str, password: &str) -> String {
        let (status, body, cookie) = self
            .json(
                Method::POST,
                "/api/login",
                None,
                Some(serde_json::json!({ "name": name, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        cookie.expect("login sets a session cookie")
    }
}

/// `name=value` of the session cookie set by `res`, if any.
pub fn session_cookie(res: &Response) -> Option<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(crate::auth::LOGIN_COOKIE))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

/// A `multipart/form-data` body made of text fields and at most one file.
pub fn multipart_body(
    boundary: &str,
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &[u8])>,
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
