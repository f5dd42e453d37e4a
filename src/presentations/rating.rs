use axum::{Json, extract::Path};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::User,
    groups::group_id_of_user,
    permission::UserType,
    presentations::Presentation,
    schema::{presentations, ratings},
    state::Conn,
    util_resp::{FailureResponse, JsonBody, StandardResponse, success},
    validation::is_valid_rating,
};

/// Arithmetic mean of `ratings`, rounded half away from zero to two decimal
/// places. `None` for an empty slice.
pub fn mean_point(ratings: &[f64]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }

    let sum = ratings
        .iter()
        .map(|r| Decimal::from_f64(*r).unwrap_or_default())
        .sum::<Decimal>();
    let mean = sum / Decimal::from(ratings.len());

    mean.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingOutcome {
    pub message: String,
    pub new_point: f64,
    pub total_ratings: usize,
    pub is_update: bool,
}

/// Records `user`'s rating of a presentation and refreshes the presentation's
/// point.
///
/// A student may not rate a presentation belonging to their own group, and
/// must belong to some group to rate at all. Staff may rate anything. Re-rating replaces the earlier value. The rating and
/// the new point are written in one transaction.
pub fn submit_rating(
    presentation_id: &str,
    user: &User,
    rating: f64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<RatingOutcome, FailureResponse> {
    is_valid_rating(rating).map_err(FailureResponse::BadRequest)?;

    conn.transaction(|conn| {
        let presentation = Presentation::fetch(presentation_id, conn)?;

        if UserType::resolve(user, &presentation, conn)?
            == UserType::StudentInGroup
        {
            return Err(FailureResponse::Forbidden(
                "You cannot rate your own group's presentation.".to_string(),
            ));
        }
        if !user.is_staff() && group_id_of_user(&user.id, conn)?.is_none() {
            return Err(FailureResponse::Forbidden(
                "You must belong to a group to rate presentations.".to_string(),
            ));
        }

        let now = Utc::now().naive_utc();
        let updated = diesel::update(
            ratings::table.filter(
                ratings::presentation_id
                    .eq(&presentation.id)
                    .and(ratings::user_id.eq(&user.id)),
            ),
        )
        .set((ratings::rating.eq(rating), ratings::updated_at.eq(now)))
        .execute(conn)?;

        let is_update = updated > 0;
        if !is_update {
            diesel::insert_into(ratings::table)
                .values((
                    ratings::id.eq(Uuid::now_v7().to_string()),
                    ratings::presentation_id.eq(&presentation.id),
                    ratings::user_id.eq(&user.id),
                    ratings::rating.eq(rating),
                    ratings::created_at.eq(now),
                    ratings::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        let all = ratings::table
            .filter(ratings::presentation_id.eq(&presentation.id))
            .select(ratings::rating)
            .load::<f64>(conn)?;

        let new_point = mean_point(&all).ok_or_else(|| {
            FailureResponse::ServerError(
                "rating vanished before the average was taken".to_string(),
            )
        })?;

        diesel::update(presentations::table.find(&presentation.id))
            .set(presentations::point.eq(Some(new_point)))
            .execute(conn)?;

        tracing::info!(
            presentation_id = %presentation.id,
            user_id = %user.id,
            rating,
            new_point,
            is_update,
            "Recorded rating"
        );

        Ok(RatingOutcome {
            message: if is_update {
                "Rating updated.".to_string()
            } else {
                "Rating added.".to_string()
            },
            new_point,
            total_ratings: all.len(),
            is_update,
        })
    })
}

pub fn has_rated(
    presentation_id: &str,
    user_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<bool, FailureResponse> {
    Ok(diesel::select(diesel::dsl::exists(
        ratings::table.filter(
            ratings::presentation_id
                .eq(presentation_id)
                .and(ratings::user_id.eq(user_id)),
        ),
    ))
    .get_result::<bool>(conn)?)
}

#[derive(Deserialize)]
pub struct RatingForm {
    rating: Option<f64>,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, presentation_id = %presentation_id))]
pub async fn do_rate_presentation(
    Path(presentation_id): Path<String>,
    user: User,
    mut conn: Conn,
    WithRejection(Json(form), _): JsonBody<RatingForm>,
) -> StandardResponse<RatingOutcome> {
    let Some(rating) = form.rating else {
        return Err(FailureResponse::BadRequest(
            "A rating is required.".to_string(),
        ));
    };

    success(submit_rating(&presentation_id, &user, rating, &mut *conn)?)
}
