pub mod auth;
pub mod binding;
