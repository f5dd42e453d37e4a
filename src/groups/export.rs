//! CSV export of the groups which have not presented yet.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use indexmap::IndexMap;
use itertools::Itertools;

use crate::{
    auth::User,
    schema::{group_members, presentations, student_groups, users},
    state::Conn,
    util_resp::FailureResponse,
};

pub const EXPORT_FILE_NAME: &str = "groups-not-passed.csv";

#[derive(Debug, PartialEq)]
pub struct NotPassedGroup {
    pub name: String,
    /// "First Last" display names.
    pub members: Vec<String>,
}

/// A group "has passed" once any of its presentations has received a point.
/// Returns every other group, ordered by name.
pub fn groups_not_passed(
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Vec<NotPassedGroup>, FailureResponse> {
    let passed = presentations::table
        .filter(presentations::point.is_not_null())
        .select(presentations::group_id);

    let groups: Vec<(String, String)> = student_groups::table
        .filter(student_groups::id.ne_all(passed))
        .order_by((student_groups::name, student_groups::id))
        .select((student_groups::id, student_groups::name))
        .load(conn)?;

    let mut out: IndexMap<String, NotPassedGroup> = groups
        .into_iter()
        .map(|(id, name)| {
            let group = NotPassedGroup {
                name,
                members: Vec::new(),
            };
            (id, group)
        })
        .collect();

    let members: Vec<(String, String, String)> = group_members::table
        .inner_join(users::table)
        .filter(group_members::group_id.eq_any(out.keys().cloned().collect_vec()))
        .order_by((users::name, users::first_name))
        .select((group_members::group_id, users::first_name, users::name))
        .load(conn)?;

    for (group_id, first_name, name) in members {
        if let Some(group) = out.get_mut(&group_id) {
            group.members.push(format!("{first_name} {name}"));
        }
    }

    Ok(out.into_values().collect())
}

pub fn render_csv(groups: &[NotPassedGroup]) -> Result<Vec<u8>, FailureResponse> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Group", "Members"])?;
    for group in groups {
        writer.write_record([
            group.name.as_str(),
            group.members.iter().join(", ").as_str(),
        ])?;
    }
    writer.into_inner().map_err(|e| {
        FailureResponse::ServerError(format!("csv export error: {e}"))
    })
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn download_groups_not_passed(
    user: User,
    mut conn: Conn,
) -> Result<Response, FailureResponse> {
    user.require_staff()?;

    let groups = groups_not_passed(&mut *conn)?;
    let body = render_csv(&groups)?;

    tracing::info!(groups = groups.len(), "Exported groups not passed");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILE_NAME}\""),
            ),
        ],
        body,
    )
        .into_response())
}
