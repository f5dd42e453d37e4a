use axum::Json;
use axum_extra::extract::{PrivateCookieJar, WithRejection};
use diesel::prelude::*;
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{PublicUser, ResettingUser, hash_password, set_login_cookie},
    schema::users,
    state::Conn,
    util_resp::{FailureResponse, JsonBody},
    validation::is_valid_password,
};

pub const RESET_CODE_LEN: usize = 8;

pub fn generate_reset_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_CODE_LEN)
        .map(char::from)
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordForm {
    #[serde(default)]
    new_password: String,
}

#[derive(Serialize)]
pub struct SetPasswordResponse {
    pub success: bool,
    pub user: PublicUser,
}

/// Replaces the caller's password (or one-time reset code) and upgrades a
/// pending-reset session into a full one.
#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn do_set_password(
    ResettingUser(user): ResettingUser,
    mut conn: Conn,
    jar: PrivateCookieJar,
    WithRejection(Json(form), _): JsonBody<SetPasswordForm>,
) -> Result<(PrivateCookieJar, Json<SetPasswordResponse>), FailureResponse> {
    // sign-in compares against exactly what was typed
    is_valid_password(form.new_password.trim())
        .map_err(FailureResponse::BadRequest)?;

    let hash = hash_password(&form.new_password)?;

    diesel::update(users::table.filter(users::id.eq(&user.id)))
        .set((
            users::password_hash.eq(Some(hash)),
            users::reset_password.eq(None::<String>),
        ))
        .execute(&mut *conn)?;

    tracing::info!("Password updated");

    let jar = set_login_cookie(user.id.clone(), false, jar)?;

    Ok((
        jar,
        Json(SetPasswordResponse {
            success: true,
            user: user.public(),
        }),
    ))
}
