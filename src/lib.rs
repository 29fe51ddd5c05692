pub mod app;
pub mod archive;
pub mod builder;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod output;
pub mod router;
pub mod source;
pub mod store;
