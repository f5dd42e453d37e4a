use diesel::{connection::LoadConnection, sqlite::Sqlite};
use serde::Serialize;

use crate::{
    auth::User, groups::group_id_of_user, presentations::Presentation,
    util_resp::FailureResponse,
};

/// How the acting user relates to a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Teacher,
    StudentInGroup,
    StudentNotInGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_edit_description: bool,
    pub can_upload: bool,
    pub can_rate: bool,
    pub can_add_feedback: bool,
    pub can_view_all: bool,
}

impl UserType {
    pub fn permissions(self) -> Permissions {
        match self {
            UserType::Teacher => Permissions {
                can_edit_description: false,
                can_upload: false,
                can_rate: true,
                can_add_feedback: true,
                can_view_all: true,
            },
            UserType::StudentInGroup => Permissions {
                can_edit_description: true,
                can_upload: true,
                can_rate: false,
                can_add_feedback: false,
                can_view_all: true,
            },
            UserType::StudentNotInGroup => Permissions {
                can_edit_description: false,
                can_upload: false,
                can_rate: true,
                can_add_feedback: false,
                can_view_all: true,
            },
        }
    }

    pub fn resolve_for_group(
        user: &User,
        group_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<UserType, FailureResponse> {
        if user.is_staff() {
            return Ok(UserType::Teacher);
        }

        match group_id_of_user(&user.id, conn)? {
            Some(own) if own == group_id => Ok(UserType::StudentInGroup),
            _ => Ok(UserType::StudentNotInGroup),
        }
    }

    /// Staff short-circuit to [`UserType::Teacher`]; students are compared by
    /// their (single) group membership.
    pub fn resolve(
        user: &User,
        presentation: &Presentation,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<UserType, FailureResponse> {
        UserType::resolve_for_group(user, &presentation.group_id, conn)
    }
}

/// Whether `user` may download presentation files: staff, or any student
/// who belongs to some group.
pub fn can_download(
    user: &User,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<bool, FailureResponse> {
    if user.is_staff() {
        return Ok(true);
    }
    Ok(group_id_of_user(&user.id, conn)?.is_some())
}
