use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod auth;
pub mod config;
pub mod groups;
pub mod permission;
pub mod presentations;
pub mod schema;
pub mod state;
pub mod storage;
pub mod students;
pub mod util_resp;
pub mod validation;

#[cfg(test)]
mod test;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
