//! Imports users from a CSV file with the columns `name,first_name,role,group`
//! (and optionally `email`). Groups are created on first mention. Each new
//! user gets a one-time reset code, which is printed so it can be handed out.

use std::{fs::File, io::Write, path::PathBuf};

use clap::Parser;
use diesel::{Connection, SqliteConnection, prelude::*};
use diesel_migrations::MigrationHarness;
use presdesk::{
    MIGRATIONS,
    auth::{Role, User, password::generate_reset_code},
    groups::{Group, change_group},
    schema::{student_groups, users},
    util_resp::FailureResponse,
};
use serde::Deserialize;

#[derive(Parser)]
pub struct Import {
    /// CSV file of users to import.
    users: PathBuf,
    #[clap(long)]
    database_url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct UserRow {
    name: String,
    first_name: String,
    role: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    email: Option<String>,
}

fn group_named(
    name: &str,
    conn: &mut SqliteConnection,
) -> Result<Group, FailureResponse> {
    let existing = student_groups::table
        .filter(student_groups::name.eq(name))
        .select(Group::as_select())
        .first(conn)
        .optional()?;
    match existing {
        Some(group) => Ok(group),
        None => Group::create(name, conn),
    }
}

fn import_row(
    row: &UserRow,
    conn: &mut SqliteConnection,
) -> Result<Option<String>, FailureResponse> {
    let exists = users::table
        .filter(users::name.eq(&row.name))
        .count()
        .get_result::<i64>(conn)?
        > 0;
    if exists {
        return Ok(None);
    }

    let role = Role::parse(&row.role.trim().to_ascii_uppercase()).ok_or_else(
        || FailureResponse::BadRequest(format!("unknown role `{}`", row.role)),
    )?;

    let code = generate_reset_code();
    let user = User::create(
        &row.name,
        &row.first_name,
        row.email.as_deref().filter(|e| !e.is_empty()),
        role,
        &code,
        conn,
    )?;

    let group = row.group.trim();
    if !group.is_empty() && role == Role::Student {
        let group = group_named(group, conn)?;
        change_group(&user.id, Some(&group.id), conn)?;
    }

    Ok(Some(code))
}

fn main() {
    // stdout carries the CSV of reset codes
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Import::parse();
    let db_url = if let Some(url) = args.database_url {
        url
    } else {
        std::env::var("DATABASE_URL").expect(
            "please either set `DATABASE_URL` or pass the `--database-url` flag",
        )
    };

    let mut conn = SqliteConnection::establish(&db_url).unwrap();
    conn.run_pending_migrations(MIGRATIONS).unwrap();

    let mut reader = csv::Reader::from_reader(File::open(&args.users).unwrap());
    let rows = reader
        .deserialize::<UserRow>()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let codes = conn
        .transaction(|conn| {
            rows.iter()
                .map(|row| Ok((row, import_row(row, conn)?)))
                .collect::<Result<Vec<_>, FailureResponse>>()
        })
        .unwrap_or_else(|e| panic!("import failed: {e:?}"));

    let mut issued = Vec::new();
    for (row, code) in &codes {
        match code {
            Some(code) => issued.push((row.name.as_str(), code.as_str())),
            None => tracing::warn!("Skipped `{}`: already exists", row.name),
        }
    }
    write_codes(std::io::stdout(), &issued).unwrap();
}

/// Writes `name,reset_code` rows as CSV, quoting names where needed.
fn write_codes(out: impl Write, codes: &[(&str, &str)]) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["name", "reset_code"])?;
    for (name, code) in codes {
        writer.write_record([name, code])?;
    }
    writer.flush()?;
    Ok(())
}
