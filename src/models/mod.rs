// src/models/mod.rs

//! Domain models for the comment relay.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod comment;
mod config;
mod event;

// Re-export all public types
pub use comment::{Author, Comment, CommentPage, Post};
pub use config::{
    BackoffConfig, BatchConfig, Config, LoggingConfig, MonitorConfig, OutputConfig, SinkKind,
    SourceConfig, SpreadsheetConfig,
};
pub use event::{Batch, DetectedEvent, Event, TABLE_HEADER};
