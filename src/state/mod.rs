/// State management module
///
/// This module handles all application state, including:
/// - Database connections and queries (library.rs)
/// - Shared data structures (data.rs)
/// - Importing music folders into the catalog (import.rs)
/// - User settings persisted as JSON (config.rs)

pub mod config;
pub mod data;
pub mod import;
pub mod library;
