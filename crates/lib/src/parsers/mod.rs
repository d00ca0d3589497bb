//! Parsers for persisted boot loader configuration formats.

pub mod loader_conf;
