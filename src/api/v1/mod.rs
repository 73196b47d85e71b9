//! Version 1 of the JSON API.

pub mod auth;
pub mod feed;
pub mod routes;
pub mod user;
