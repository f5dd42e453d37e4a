use chrono::{NaiveDateTime, Utc};
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::Serialize;
use uuid::Uuid;

use crate::{schema::presentations, util_resp::FailureResponse};

pub mod files;
pub mod manage;
pub mod rating;
pub mod view;

#[derive(Queryable, Selectable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = presentations)]
#[diesel(check_for_backend(Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub name_file: Option<String>,
    pub path_file: Option<String>,
    pub group_id: String,
    pub active: bool,
    /// Mean of all ratings, rounded to two decimals. `None` until the first
    /// rating arrives.
    pub point: Option<f64>,
    pub feedback: Option<String>,
    pub uploaded_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Fields of a presentation that is about to be inserted.
pub struct NewPresentation<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub group_id: &'a str,
    pub file: Option<(&'a str, &'a str)>,
}

impl Presentation {
    pub fn fetch(
        id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Presentation, FailureResponse> {
        presentations::table
            .filter(presentations::id.eq(id))
            .select(Presentation::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| {
                FailureResponse::NotFound("Presentation not found.".to_string())
            })
    }

    /// Newest upload first. Presentations still waiting for a file are
    /// listed before every uploaded one.
    pub fn of_group(
        group_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Presentation>, FailureResponse> {
        Ok(presentations::table
            .filter(presentations::group_id.eq(group_id))
            .order_by((
                presentations::uploaded_at.is_null().desc(),
                presentations::uploaded_at.desc(),
                presentations::created_at.desc(),
            ))
            .select(Presentation::as_select())
            .load(conn)?)
    }

    /// Active presentations of every group, ordered like [`Self::of_group`].
    pub fn active(
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Presentation>, FailureResponse> {
        Ok(presentations::table
            .filter(presentations::active.eq(true))
            .order_by((
                presentations::uploaded_at.is_null().desc(),
                presentations::uploaded_at.desc(),
                presentations::created_at.desc(),
            ))
            .select(Presentation::as_select())
            .load(conn)?)
    }

    /// Inserts a new, active, unrated presentation. The upload timestamp is
    /// only set when a file comes with it.
    pub fn insert(
        new: NewPresentation<'_>,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Presentation, FailureResponse> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().naive_utc();

        diesel::insert_into(presentations::table)
            .values((
                presentations::id.eq(&id),
                presentations::title.eq(new.title),
                presentations::description.eq(new.description),
                presentations::name_file.eq(new.file.map(|(name, _)| name)),
                presentations::path_file.eq(new.file.map(|(_, path)| path)),
                presentations::group_id.eq(new.group_id),
                presentations::active.eq(true),
                presentations::point.eq(None::<f64>),
                presentations::feedback.eq(None::<String>),
                presentations::uploaded_at.eq(new.file.map(|_| now)),
                presentations::created_at.eq(now),
            ))
            .execute(conn)?;

        Presentation::fetch(&id, conn)
    }
}
