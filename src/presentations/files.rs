use axum::{
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::Serialize;

use crate::{
    auth::User,
    groups::group_id_of_user,
    permission::{UserType, can_download},
    presentations::{NewPresentation, Presentation},
    schema::presentations,
    state::Conn,
    storage::ObjectStore,
    util_resp::{FailureResponse, StandardResponse, success},
    validation::{MAX_UPLOAD_BYTES, clean_text, storage_key_for},
};

/// Where an uploaded file ends up.
#[derive(Debug)]
pub enum UploadTarget {
    /// Replace the file of an existing presentation.
    Existing(Presentation),
    /// Create a new presentation owned by this group.
    NewIn { group_id: String },
}

/// Decides where an upload goes, and whether `user` may make it.
pub fn upload_target(
    user: &User,
    presentation_id: Option<&str>,
    group_id: Option<&str>,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<UploadTarget, FailureResponse> {
    if let Some(presentation_id) = presentation_id {
        let presentation = Presentation::fetch(presentation_id, conn)?;
        if UserType::resolve(user, &presentation, conn)?
            != UserType::StudentInGroup
        {
            return Err(FailureResponse::Forbidden(
                "Only members of the group can upload its presentation."
                    .to_string(),
            ));
        }
        return Ok(UploadTarget::Existing(presentation));
    }

    let own = group_id_of_user(&user.id, conn)?;
    let group_id = match (group_id, own) {
        (Some(requested), Some(own)) if requested == own => own,
        (None, Some(own)) => own,
        (Some(_), _) => {
            return Err(FailureResponse::Forbidden(
                "You can only upload for your own group.".to_string(),
            ));
        }
        (None, None) => {
            return Err(FailureResponse::BadRequest(
                "You are not a member of any group.".to_string(),
            ));
        }
    };

    Ok(UploadTarget::NewIn { group_id })
}

/// A stored file, as recorded against a presentation.
pub struct StoredFile<'a> {
    pub file_name: &'a str,
    pub key: &'a str,
}

pub fn record_upload(
    target: UploadTarget,
    file: StoredFile<'_>,
    title: Option<&str>,
    description: Option<&str>,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Presentation, FailureResponse> {
    match target {
        UploadTarget::Existing(presentation) => {
            diesel::update(presentations::table.find(&presentation.id))
                .set((
                    presentations::name_file.eq(Some(file.file_name)),
                    presentations::path_file.eq(Some(file.key)),
                    presentations::uploaded_at.eq(Some(Utc::now().naive_utc())),
                ))
                .execute(conn)?;
            Presentation::fetch(&presentation.id, conn)
        }
        UploadTarget::NewIn { group_id } => {
            let description = description.map(clean_text);
            Presentation::insert(
                NewPresentation {
                    title: title.unwrap_or(file.file_name),
                    description: description.as_deref(),
                    group_id: &group_id,
                    file: Some((file.file_name, file.key)),
                },
                conn,
            )
        }
    }
}

#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    title: Option<String>,
    description: Option<String>,
    group_id: Option<String>,
    presentation_id: Option<String>,
}

fn multipart_error(e: MultipartError) -> FailureResponse {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => FailureResponse::PayloadTooLarge(
            "The file may not exceed 50 MB.".to_string(),
        ),
        _ => FailureResponse::BadRequest(e.body_text()),
    }
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, FailureResponse> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "pptFile" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?;
            if bytes.len() > MAX_UPLOAD_BYTES {
                return Err(FailureResponse::PayloadTooLarge(
                    "The file may not exceed 50 MB.".to_string(),
                ));
            }
            form.file = Some((file_name, bytes.to_vec()));
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        let value = Some(text.trim().to_string()).filter(|v| !v.is_empty());
        match name.as_str() {
            "title" => form.title = value,
            "description" => form.description = value,
            "group_id" => form.group_id = value,
            "presentation_id" => form.presentation_id = value,
            _ => (),
        }
    }

    Ok(form)
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub path: String,
    pub presentation: Presentation,
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn do_upload(
    user: User,
    mut conn: Conn,
    State(store): State<ObjectStore>,
    multipart: Multipart,
) -> StandardResponse<UploadResponse> {
    let form = read_form(multipart).await?;

    let Some((file_name, bytes)) = form.file else {
        return Err(FailureResponse::BadRequest("No file was sent.".to_string()));
    };
    let Some(key) =
        storage_key_for(&file_name, Utc::now().timestamp_millis())
    else {
        return Err(FailureResponse::BadRequest(
            "Only .ppt, .pptx and .pdf files are accepted.".to_string(),
        ));
    };

    let target = upload_target(
        &user,
        form.presentation_id.as_deref(),
        form.group_id.as_deref(),
        &mut *conn,
    )?;
    let replacing = matches!(target, UploadTarget::Existing(_));

    store.put(&key, &bytes).await?;

    let presentation = record_upload(
        target,
        StoredFile {
            file_name: &file_name,
            key: &key,
        },
        form.title.as_deref(),
        form.description.as_deref(),
        &mut *conn,
    )?;

    tracing::info!(
        presentation_id = %presentation.id,
        key = %key,
        bytes = bytes.len(),
        "Stored presentation file"
    );

    success(UploadResponse {
        message: match replacing {
            true => "File updated.".to_string(),
            false => "Upload complete.".to_string(),
        },
        path: key,
        presentation,
    })
}

#[tracing::instrument(skip_all, fields(user_id = %user.id, presentation_id = %presentation_id))]
pub async fn download(
    Path(presentation_id): Path<String>,
    user: User,
    mut conn: Conn,
    State(store): State<ObjectStore>,
) -> Result<Response, FailureResponse> {
    let presentation = Presentation::fetch(&presentation_id, &mut *conn)?;
    let Some(key) = presentation.path_file.as_deref() else {
        return Err(FailureResponse::NotFound(
            "No file has been uploaded for this presentation.".to_string(),
        ));
    };

    if !can_download(&user, &mut *conn)? {
        return Err(FailureResponse::Forbidden(
            "You are not allowed to download this file.".to_string(),
        ));
    }

    let bytes = match store.get(key).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(key, "Presentation file missing from storage");
            return Err(FailureResponse::NotFound(
                "The file could not be found.".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let file_name = presentation
        .name_file
        .as_deref()
        .unwrap_or("presentation")
        .replace(['"', '\\', '\r', '\n'], "");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
