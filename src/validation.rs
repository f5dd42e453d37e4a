use std::{collections::HashSet, path::Path};

use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 4;
pub const MAX_RATING: f64 = 20.0;
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const UPLOAD_EXTENSIONS: [&str; 3] = ["ppt", "pptx", "pdf"];

pub fn is_valid_password(password: &str) -> Result<(), String> {
    match password.chars().count() >= MIN_PASSWORD_LEN {
        true => Ok(()),
        false => Err(format!(
            "The new password must contain at least {MIN_PASSWORD_LEN} characters."
        )),
    }
}

pub fn is_valid_rating(rating: f64) -> Result<(), String> {
    match rating.is_finite() && (0.0..=MAX_RATING).contains(&rating) {
        true => Ok(()),
        false => Err("The rating must be between 0 and 20.".to_string()),
    }
}

pub fn is_valid_group_name(name: &str) -> Result<(), String> {
    let len = name.trim().chars().count();
    match (1..=128).contains(&len) {
        true => Ok(()),
        false => {
            Err("Group name must be between 1 and 128 characters.".to_string())
        }
    }
}

/// Lower-cased extension of an uploadable file name, or `None` if the file
/// type is not accepted.
pub fn upload_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    UPLOAD_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Lowercases `stem` and collapses anything outside `[A-Za-z0-9_-]` into
/// `-`. An empty stem becomes `file`.
pub fn sanitize_file_stem(stem: &str) -> String {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-]+").unwrap());
    let cleaned = RE.replace_all(stem, "-").to_lowercase();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Object-store key for an uploaded file: `presentations/<stem>-<millis>.<ext>`.
pub fn storage_key_for(file_name: &str, millis: i64) -> Option<String> {
    let ext = upload_extension(file_name)?;
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    Some(format!(
        "presentations/{}-{millis}.{ext}",
        sanitize_file_stem(stem)
    ))
}

/// Removes markup from free text which the client renders as HTML.
pub fn clean_text(text: &str) -> String {
    let mut builder = ammonia::Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    builder.clean(text).to_string()
}
