// src/lib.rs

//! Comment relay library: watches one post and relays its new comments.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
