//! Domain models shared by the auth core and its adapters.

pub mod auth;
