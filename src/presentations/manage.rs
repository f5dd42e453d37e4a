use axum::{Json, extract::Path};
use axum_extra::extract::WithRejection;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};

use crate::{
    auth::User,
    groups::Group,
    permission::UserType,
    presentations::{NewPresentation, Presentation},
    schema::presentations,
    state::Conn,
    util_resp::{
        FailureResponse, JsonBody, StandardResponse, forbidden, success,
    },
    validation::clean_text,
};

/// Creates an empty presentation for a group, named after the group and the
/// number of presentations it already has.
pub fn auto_create(
    group_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Presentation, FailureResponse> {
    conn.transaction(|conn| {
        let group = Group::fetch(group_id, conn)?;
        let existing = presentations::table
            .filter(presentations::group_id.eq(&group.id))
            .count()
            .get_result::<i64>(conn)?;

        let title = format!("{} - Presentation {}", group.name, existing + 1);
        Presentation::insert(
            NewPresentation {
                title: &title,
                description: None,
                group_id: &group.id,
                file: None,
            },
            conn,
        )
    })
}

#[derive(Serialize)]
pub struct PresentationCreated {
    pub message: String,
    pub presentation: Presentation,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, group_id = %group_id))]
pub async fn do_auto_create(
    Path(group_id): Path<String>,
    user: User,
    mut conn: Conn,
) -> StandardResponse<PresentationCreated> {
    user.require_staff()?;

    let presentation = auto_create(&group_id, &mut *conn)?;
    tracing::info!(presentation_id = %presentation.id, "Created presentation");

    success(PresentationCreated {
        message: "Presentation created.".to_string(),
        presentation,
    })
}

#[derive(Deserialize)]
pub struct DescriptionForm {
    #[serde(default)]
    description: String,
}

#[derive(Serialize)]
pub struct DescriptionUpdated {
    pub message: String,
    pub description: String,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, presentation_id = %presentation_id))]
pub async fn do_update_description(
    Path(presentation_id): Path<String>,
    user: User,
    mut conn: Conn,
    WithRejection(Json(form), _): JsonBody<DescriptionForm>,
) -> StandardResponse<DescriptionUpdated> {
    let presentation = Presentation::fetch(&presentation_id, &mut *conn)?;
    if UserType::resolve(&user, &presentation, &mut *conn)?
        != UserType::StudentInGroup
    {
        return forbidden(
            "Only members of the group can edit the description.",
        );
    }

    let description = clean_text(&form.description);
    diesel::update(presentations::table.find(&presentation.id))
        .set(presentations::description.eq(Some(&description)))
        .execute(&mut *conn)?;

    success(DescriptionUpdated {
        message: "Description updated.".to_string(),
        description,
    })
}

#[derive(Deserialize)]
pub struct FeedbackForm {
    #[serde(default)]
    feedback: String,
}

#[derive(Serialize)]
pub struct FeedbackUpdated {
    pub message: String,
    pub feedback: String,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, presentation_id = %presentation_id))]
pub async fn do_update_feedback(
    Path(presentation_id): Path<String>,
    user: User,
    mut conn: Conn,
    WithRejection(Json(form), _): JsonBody<FeedbackForm>,
) -> StandardResponse<FeedbackUpdated> {
    user.require_staff()?;

    let presentation = Presentation::fetch(&presentation_id, &mut *conn)?;
    let feedback = clean_text(&form.feedback);
    diesel::update(presentations::table.find(&presentation.id))
        .set(presentations::feedback.eq(Some(&feedback)))
        .execute(&mut *conn)?;

    success(FeedbackUpdated {
        message: "Feedback saved.".to_string(),
        feedback,
    })
}

#[derive(Serialize)]
pub struct ActiveToggled {
    pub message: String,
    pub presentation: Presentation,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, presentation_id = %presentation_id))]
pub async fn do_toggle_active(
    Path(presentation_id): Path<String>,
    user: User,
    mut conn: Conn,
) -> StandardResponse<ActiveToggled> {
    user.require_staff()?;

    let presentation = Presentation::fetch(&presentation_id, &mut *conn)?;
    diesel::update(presentations::table.find(&presentation.id))
        .set(presentations::active.eq(!presentation.active))
        .execute(&mut *conn)?;
    let presentation = Presentation::fetch(&presentation.id, &mut *conn)?;

    success(ActiveToggled {
        message: match presentation.active {
            true => "Presentation activated.".to_string(),
            false => "Presentation deactivated.".to_string(),
        },
        presentation,
    })
}
