//! Core logic: schema, merging, templates, argument sets, builders and generation.

pub mod arguments;
pub mod builder;
pub mod command;
pub mod error;
pub mod generator;
pub mod merge;
pub mod parser;
pub mod registry;
pub mod template;
pub mod types;
