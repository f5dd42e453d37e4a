use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::{
    PrivateCookieJar,
    cookie::{Cookie, Key, SameSite},
};
use chrono::{Days, NaiveDateTime, Utc};
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};

use crate::{
    schema::users,
    state::{Conn, DbPool},
    util_resp::FailureResponse,
};

pub mod login;
pub mod password;

pub const LOGIN_COOKIE: &str = "presdesk_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Teacher => "TEACHER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "STUDENT" => Some(Role::Student),
            "TEACHER" => Some(Role::Teacher),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Teachers and administrators.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(Sqlite))]
pub struct User {
    pub id: String,
    pub name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub role: String,
    pub password_hash: Option<String>,
    pub reset_password: Option<String>,
    pub created_at: NaiveDateTime,
}

/// What clients get to see of a user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub role: Role,
}

impl User {
    pub fn role(&self) -> Role {
        // The column carries a CHECK constraint, so an unknown value can only
        // come from a hand-edited database. Treat it as the least privileged
        // role.
        Role::parse(&self.role).unwrap_or(Role::Student)
    }

    pub fn is_staff(&self) -> bool {
        self.role().is_staff()
    }

    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            first_name: self.first_name.clone(),
            email: self.email.clone(),
            role: self.role(),
        }
    }

    pub fn fetch(
        id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<User, FailureResponse> {
        users::table
            .filter(users::id.eq(id))
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| FailureResponse::NotFound("User not found.".into()))
    }

    /// Inserts a user who signs in for the first time with `reset_code`.
    pub fn create(
        name: &str,
        first_name: &str,
        email: Option<&str>,
        role: Role,
        reset_code: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<User, FailureResponse> {
        let id = uuid::Uuid::now_v7().to_string();
        diesel::insert_into(users::table)
            .values((
                users::id.eq(&id),
                users::name.eq(name),
                users::first_name.eq(first_name),
                users::email.eq(email),
                users::role.eq(role.as_str()),
                users::password_hash.eq(None::<String>),
                users::reset_password.eq(Some(reset_code)),
                users::created_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        User::fetch(&id, conn)
    }

    pub fn require_staff(&self) -> Result<(), FailureResponse> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(FailureResponse::Forbidden(
                "Only teachers can do this.".to_string(),
            ))
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, FailureResponse> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("Stored password hash is malformed: {e}");
            false
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct LoginSession {
    id: String,
    expiry: NaiveDateTime,
    /// Set when the user signed in with a one-time reset code and still has
    /// to choose a password.
    #[serde(default)]
    pending_reset: bool,
}

pub fn set_login_cookie(
    id: String,
    pending_reset: bool,
    jar: PrivateCookieJar,
) -> Result<PrivateCookieJar, FailureResponse> {
    let expiry = Utc::now()
        .naive_utc()
        .checked_add_days(Days::new(7))
        .ok_or_else(|| {
            FailureResponse::ServerError("session expiry overflow".to_string())
        })?;
    let value = serde_json::to_string(&LoginSession {
        id,
        expiry,
        pending_reset,
    })
    .map_err(|e| {
        FailureResponse::ServerError(format!("session encoding failed: {e}"))
    })?;

    Ok(jar.add(
        Cookie::build((LOGIN_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax),
    ))
}

pub fn clear_login_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(LOGIN_COOKIE).path("/"))
}

async fn session_user<S>(
    parts: &mut Parts,
    state: &S,
) -> Result<(User, LoginSession), FailureResponse>
where
    S: Send + Sync,
    DbPool: FromRef<S>,
    Key: FromRef<S>,
{
    let jar: PrivateCookieJar<Key> =
        match PrivateCookieJar::from_request_parts(parts, state).await {
            Ok(jar) => jar,
            Err(never) => match never {},
        };

    let login = jar
        .get(LOGIN_COOKIE)
        .and_then(|cookie| {
            serde_json::from_str::<LoginSession>(cookie.value()).ok()
        })
        .filter(|login| Utc::now().naive_utc() < login.expiry)
        .ok_or_else(|| {
            FailureResponse::Unauthorized("Please sign in.".to_string())
        })?;

    let mut conn = Conn::from_request_parts(parts, state).await?;

    let user = users::table
        .filter(users::id.eq(&login.id))
        .select(User::as_select())
        .first(&mut *conn)
        .optional()?
        .ok_or_else(|| {
            FailureResponse::Unauthorized("Please sign in.".to_string())
        })?;

    Ok((user, login))
}

#[async_trait]
impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
    DbPool: FromRef<S>,
    Key: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let (user, login) = session_user(parts, state).await?;
        if login.pending_reset {
            return Err(FailureResponse::Forbidden(
                "You must set a new password first.".to_string(),
            ));
        }
        Ok(user)
    }
}

/// A signed-in user, including one who still has to replace their one-time
/// reset code with a real password.
pub struct ResettingUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for ResettingUser
where
    S: Send + Sync,
    DbPool: FromRef<S>,
    Key: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let (user, _) = session_user(parts, state).await?;
        Ok(ResettingUser(user))
    }
}
