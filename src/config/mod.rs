//! Settings and the files an application ships with

pub mod images;
pub mod manifest;
pub mod settings;
