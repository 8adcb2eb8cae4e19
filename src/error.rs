use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeguardError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GitLab API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("GitLab API error (status {status}) after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("GraphQL errors in {query_type}: {errors}")]
    GraphQLError { query_type: String, errors: String },

    #[error("GraphQL response contained no data")]
    NoResponseData,

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Unknown include type: {0}")]
    UnknownIncludeType(String),
}

impl PipeguardError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } | Self::ApiErrorAfterRetries { status, .. } => {
                Some(*status)
            }
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type Result<T> = std::result::Result<T, PipeguardError>;
