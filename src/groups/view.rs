use std::collections::HashMap;

use axum::{Json, extract::Path};
use axum_extra::extract::WithRejection;
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    auth::User,
    groups::{Group, Member, members_of},
    schema::{group_members, student_groups},
    state::Conn,
    util_resp::{JsonBody, StandardResponse, bad_request, success},
    validation::is_valid_group_name,
};

#[derive(Serialize)]
pub struct MyGroup {
    pub group: Option<Group>,
    pub members: Vec<Member>,
}

pub async fn my_group(user: User, mut conn: Conn) -> StandardResponse<MyGroup> {
    let Some(group) = Group::of_user(&user.id, &mut *conn)? else {
        return success(MyGroup {
            group: None,
            members: vec![],
        });
    };

    let members = group.members(&mut *conn)?;
    success(MyGroup {
        group: Some(group),
        members,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupWithCount {
    #[serde(flatten)]
    pub group: Group,
    pub member_count: i64,
}

#[derive(Serialize)]
pub struct AllGroups {
    pub groups: Vec<GroupWithCount>,
}

pub async fn all_groups(
    _user: User,
    mut conn: Conn,
) -> StandardResponse<AllGroups> {
    let groups = student_groups::table
        .order_by(student_groups::created_at.desc())
        .select(Group::as_select())
        .load(&mut *conn)?;

    let counts: HashMap<String, i64> = group_members::table
        .group_by(group_members::group_id)
        .select((group_members::group_id, count_star()))
        .load::<(String, i64)>(&mut *conn)?
        .into_iter()
        .collect();

    let groups = groups
        .into_iter()
        .map(|group| GroupWithCount {
            member_count: counts.get(&group.id).copied().unwrap_or(0),
            group,
        })
        .collect();

    success(AllGroups { groups })
}

#[derive(Serialize)]
pub struct SingleGroup {
    pub group: Group,
}

pub async fn group_by_id(
    Path(group_id): Path<String>,
    _user: User,
    mut conn: Conn,
) -> StandardResponse<SingleGroup> {
    let group = Group::fetch(&group_id, &mut *conn)?;
    success(SingleGroup { group })
}

#[derive(Serialize)]
pub struct GroupMembers {
    pub members: Vec<Member>,
}

pub async fn group_members(
    Path(group_id): Path<String>,
    _user: User,
    mut conn: Conn,
) -> StandardResponse<GroupMembers> {
    let members = members_of(&group_id, &mut *conn)?;
    success(GroupMembers { members })
}

#[derive(Deserialize)]
pub struct CreateGroupForm {
    #[serde(default)]
    name: String,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn do_create_group(
    user: User,
    mut conn: Conn,
    WithRejection(Json(form), _): JsonBody<CreateGroupForm>,
) -> StandardResponse<SingleGroup> {
    user.require_staff()?;

    if let Err(e) = is_valid_group_name(&form.name) {
        return bad_request(e);
    }

    let group = Group::create(&form.name, &mut *conn)?;
    tracing::info!(group_id = %group.id, "Created group");

    success(SingleGroup { group })
}
