mod branches;
mod catalog;
mod ci_config;
mod core;
mod project;
mod variables;

pub use self::core::{GitLabClient, RetryPolicy};
