pub mod auth;
pub mod core;
pub mod dashboard;
pub mod import_students;
pub mod mutations;
pub mod queries;
pub mod settings;
pub mod students;
