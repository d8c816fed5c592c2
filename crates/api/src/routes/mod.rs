//! HTTP route handlers

pub mod control;
pub mod data;
pub mod status;
