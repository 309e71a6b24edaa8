pub mod error;
pub mod fields;
pub mod models;
pub mod settings;
