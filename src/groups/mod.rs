use chrono::{NaiveDateTime, Utc};
use diesel::{
    connection::LoadConnection, prelude::*, sqlite::Sqlite,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::{Role, User},
    schema::{group_members, student_groups, users},
    util_resp::FailureResponse,
};

pub mod export;
pub mod view;

#[derive(Queryable, Selectable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = student_groups)]
#[diesel(check_for_backend(Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_at: NaiveDateTime,
}

/// A group member as shown to other users.
#[derive(Queryable, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    pub first_name: String,
    pub role: String,
}

impl Group {
    pub fn fetch(
        id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Group, FailureResponse> {
        Group::fetch_opt(id, conn)?.ok_or_else(|| {
            FailureResponse::NotFound("Group not found.".to_string())
        })
    }

    pub fn fetch_opt(
        id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Group>, FailureResponse> {
        Ok(student_groups::table
            .filter(student_groups::id.eq(id))
            .select(Group::as_select())
            .first(conn)
            .optional()?)
    }

    pub fn of_user(
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Group>, FailureResponse> {
        Ok(group_members::table
            .inner_join(student_groups::table)
            .filter(group_members::user_id.eq(user_id))
            .select(Group::as_select())
            .first(conn)
            .optional()?)
    }

    pub fn create(
        name: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Group, FailureResponse> {
        let group = Group {
            id: Uuid::now_v7().to_string(),
            name: name.trim().to_string(),
            created_at: Utc::now().naive_utc(),
        };

        diesel::insert_into(student_groups::table)
            .values((
                student_groups::id.eq(&group.id),
                student_groups::name.eq(&group.name),
                student_groups::created_at.eq(group.created_at),
            ))
            .execute(conn)?;

        Ok(group)
    }

    pub fn members(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Member>, FailureResponse> {
        members_of(&self.id, conn)
    }
}

pub fn members_of(
    group_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Vec<Member>, FailureResponse> {
    Ok(group_members::table
        .inner_join(users::table)
        .filter(group_members::group_id.eq(group_id))
        .order_by((users::name, users::first_name))
        .select((users::id, users::name, users::first_name, users::role))
        .load::<Member>(conn)?)
}

/// The id of the group `user_id` belongs to, if any.
pub fn group_id_of_user(
    user_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Option<String>, FailureResponse> {
    Ok(group_members::table
        .filter(group_members::user_id.eq(user_id))
        .select(group_members::group_id)
        .first::<String>(conn)
        .optional()?)
}

/// Moves a student into `new_group_id`, or out of every group when it is
/// `None`.
///
/// Existing memberships are deleted before the new one is inserted; both
/// statements run in one transaction so a student is never left between
/// groups.
pub fn change_group(
    student_id: &str,
    new_group_id: Option<&str>,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Option<Group>, FailureResponse> {
    conn.transaction(|conn| {
        let student = User::fetch(student_id, conn)?;
        if student.role() != Role::Student {
            return Err(FailureResponse::BadRequest(
                "Only students can be assigned to a group.".to_string(),
            ));
        }

        let group = match new_group_id {
            Some(id) => Some(Group::fetch(id, conn)?),
            None => None,
        };

        let removed = diesel::delete(
            group_members::table.filter(group_members::user_id.eq(student_id)),
        )
        .execute(conn)?;

        if let Some(group) = &group {
            diesel::insert_into(group_members::table)
                .values((
                    group_members::id.eq(Uuid::now_v7().to_string()),
                    group_members::user_id.eq(student_id),
                    group_members::group_id.eq(&group.id),
                    group_members::created_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
        }

        tracing::info!(
            student_id,
            removed,
            new_group = group.as_ref().map(|g| g.id.as_str()),
            "Changed student group"
        );

        Ok(group)
    })
}
