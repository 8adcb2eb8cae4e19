pub mod ci_yaml;
mod client;
pub mod collaborators;
pub mod image;
pub mod jobs;
pub mod pipeline;
pub mod protection;
pub mod provenance;
mod provider;
pub mod types;
pub mod variables;
mod versions;
pub mod wildcard;

pub use client::RetryPolicy;
pub use provider::GitLabProvider;
