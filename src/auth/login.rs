use axum::Json;
use axum_extra::extract::{PrivateCookieJar, WithRejection};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{
        PublicUser, User, clear_login_cookie, set_login_cookie,
        verify_password,
    },
    schema::users,
    state::Conn,
    util_resp::{FailureResponse, JsonBody},
};

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(alias = "nom", default)]
    name: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: PublicUser,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub require_password_reset: bool,
}

fn bad_credentials() -> FailureResponse {
    FailureResponse::Unauthorized("Incorrect credentials.".to_string())
}

/// Signs a user in by name.
///
/// Users with a password hash authenticate against it. Users without one
/// (freshly seeded, or reset by a teacher) authenticate with their one-time
/// reset code and are then asked to choose a password.
#[tracing::instrument(skip(conn, jar, form), fields(name = %form.name))]
pub async fn do_login(
    mut conn: Conn,
    jar: PrivateCookieJar,
    WithRejection(Json(form), _): JsonBody<LoginForm>,
) -> Result<(PrivateCookieJar, Json<LoginResponse>), FailureResponse> {
    let name = form.name.trim();
    if name.is_empty() || form.password.is_empty() {
        return Err(FailureResponse::BadRequest(
            "Name and password are required.".to_string(),
        ));
    }

    let user = users::table
        .filter(users::name.eq(name))
        .select(User::as_select())
        .first(&mut *conn)
        .optional()?
        .ok_or_else(bad_credentials)?;

    let require_password_reset = match (&user.password_hash, &user.reset_password)
    {
        (Some(hash), _) => {
            if !verify_password(&form.password, hash) {
                return Err(bad_credentials());
            }
            false
        }
        (None, Some(code)) if *code == form.password => true,
        (None, _) => return Err(bad_credentials()),
    };

    tracing::info!(
        user_id = %user.id,
        require_password_reset,
        "User signed in"
    );

    let jar = set_login_cookie(user.id.clone(), require_password_reset, jar)?;

    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            user: user.public(),
            require_password_reset,
        }),
    ))
}

pub async fn do_logout(jar: PrivateCookieJar) -> PrivateCookieJar {
    clear_login_cookie(jar)
}

pub async fn me(user: User) -> Json<PublicUser> {
    Json(user.public())
}
