use axum::extract::Path;
use serde::Serialize;

use crate::{
    auth::User,
    groups::{Group, group_id_of_user},
    permission::{Permissions, UserType},
    presentations::{Presentation, rating::has_rated},
    state::Conn,
    util_resp::{StandardResponse, success},
};

pub async fn active_presentations(
    _user: User,
    mut conn: Conn,
) -> StandardResponse<Vec<Presentation>> {
    success(Presentation::active(&mut *conn)?)
}

/// Presentations of the caller's own group. Callers without a group get an
/// empty list.
pub async fn my_group_presentations(
    user: User,
    mut conn: Conn,
) -> StandardResponse<Vec<Presentation>> {
    match group_id_of_user(&user.id, &mut *conn)? {
        Some(group_id) => success(Presentation::of_group(&group_id, &mut *conn)?),
        None => success(vec![]),
    }
}

pub async fn group_presentations(
    Path(group_id): Path<String>,
    _user: User,
    mut conn: Conn,
) -> StandardResponse<Vec<Presentation>> {
    success(Presentation::of_group(&group_id, &mut *conn)?)
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum GroupSummary {
    Known(Group),
    Unknown { name: &'static str },
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PresentationDetails {
    pub presentation: Presentation,
    pub group: GroupSummary,
    pub user_type: UserType,
    pub permissions: Permissions,
    pub has_rated: bool,
}

pub async fn presentation_details(
    Path(presentation_id): Path<String>,
    user: User,
    mut conn: Conn,
) -> StandardResponse<PresentationDetails> {
    let presentation = Presentation::fetch(&presentation_id, &mut *conn)?;

    let group = match Group::fetch_opt(&presentation.group_id, &mut *conn)? {
        Some(group) => GroupSummary::Known(group),
        None => {
            tracing::warn!(
                presentation_id = %presentation.id,
                group_id = %presentation.group_id,
                "Presentation belongs to a missing group"
            );
            GroupSummary::Unknown {
                name: "Unknown group",
            }
        }
    };

    let user_type = UserType::resolve(&user, &presentation, &mut *conn)?;
    // only outside students see the "already rated" state
    let has_rated = match user_type {
        UserType::StudentNotInGroup => {
            has_rated(&presentation.id, &user.id, &mut *conn)?
        }
        UserType::Teacher | UserType::StudentInGroup => false,
    };

    success(PresentationDetails {
        presentation,
        group,
        user_type,
        permissions: user_type.permissions(),
        has_rated,
    })
}
