//! Adapters compiled into the server.

pub mod generic;
