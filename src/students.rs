use axum::{Json, extract::Path};
use axum_extra::extract::WithRejection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{Role, User, password::generate_reset_code},
    groups::{Group, change_group},
    schema::{group_members, student_groups, users},
    state::Conn,
    util_resp::{JsonBody, StandardResponse, bad_request, success},
};

#[derive(Serialize, Queryable, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
}

#[derive(Serialize)]
pub struct Students {
    pub students: Vec<StudentRow>,
}

pub async fn list_students(
    user: User,
    mut conn: Conn,
) -> StandardResponse<Students> {
    user.require_staff()?;

    let students = users::table
        .left_join(group_members::table.left_join(student_groups::table))
        .filter(users::role.eq(Role::Student.as_str()))
        .order_by((users::name, users::first_name))
        .select((
            users::id,
            users::name,
            users::first_name,
            users::email,
            group_members::group_id.nullable(),
            student_groups::name.nullable(),
        ))
        .load::<StudentRow>(&mut *conn)?;

    success(Students { students })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordResponse {
    pub message: String,
    pub reset_code: String,
}

/// Replaces a student's password with a fresh one-time code. The student
/// signs in with the code and is then made to choose a new password.
#[tracing::instrument(skip_all, fields(user_id = %user.id, student_id = %student_id))]
pub async fn do_reset_password(
    Path(student_id): Path<String>,
    user: User,
    mut conn: Conn,
) -> StandardResponse<ResetPasswordResponse> {
    user.require_staff()?;

    let student = User::fetch(&student_id, &mut *conn)?;
    if student.is_staff() {
        return bad_request("Only student passwords can be reset here.");
    }

    let reset_code = generate_reset_code();
    diesel::update(users::table.filter(users::id.eq(&student.id)))
        .set((
            users::password_hash.eq(None::<String>),
            users::reset_password.eq(Some(reset_code.clone())),
        ))
        .execute(&mut *conn)?;

    tracing::info!("Reset student password");

    success(ResetPasswordResponse {
        message: format!(
            "Password reset for {} {}.",
            student.first_name, student.name
        ),
        reset_code,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeGroupForm {
    group_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChangeGroupResponse {
    pub message: String,
    pub group: Option<Group>,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, student_id = %student_id))]
pub async fn do_change_group(
    Path(student_id): Path<String>,
    user: User,
    mut conn: Conn,
    WithRejection(Json(form), _): JsonBody<ChangeGroupForm>,
) -> StandardResponse<ChangeGroupResponse> {
    user.require_staff()?;

    let group_id = form.group_id.as_deref().filter(|id| !id.is_empty());
    let group = change_group(&student_id, group_id, &mut *conn)?;

    let message = match &group {
        Some(group) => format!("Student moved to {}.", group.name),
        None => "Student removed from their group.".to_string(),
    };

    success(ChangeGroupResponse { message, group })
}
