//! Domain models shared by the auth services, stores and the API layer.

pub mod auth;
