pub mod candidates;
pub mod config;
pub mod consistency;
pub mod db;
pub mod harmony;
pub mod phrase;
pub mod scoring;
pub mod sequence;
pub mod tiler;
pub mod tiling;

/// Application name for XDG paths
pub const APP_NAME: &str = "walkingbass";
