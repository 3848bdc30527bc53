//! Lesson ingest - folder-to-record ingestion for classroom materials
//!
//! Watches a folder tree of lesson boards and videos, works out which
//! student, date and class each file belongs to, uploads it and links it to
//! the matching class session in the remote store.

pub mod config;
pub mod db;
pub mod services;
