//! Album grid browser core
//!
//! - `art`: bounded cover art cache with background, viewport-prioritised loading
//! - `ui`: viewport coordination for the album grid
//! - `state`: music catalog, folder import and settings

pub mod art;
pub mod state;
pub mod ui;
