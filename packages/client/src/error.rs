use wirefn_core::{DefinitionError, ValidationErrors};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Invalid parameters to \"{title}\": too many parameters. Expected {expected}, received {received}.")]
    TooManyArguments {
        title: String,
        expected: usize,
        received: usize,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(ValidationErrors),

    /// The server answered with a non-success status.
    #[error("{status_text}")]
    Status { status: u16, status_text: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(ValidationErrors),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The Definition could not be compiled.
    #[error(transparent)]
    Definition(#[from] wirefn_core::Error),
}

impl From<DefinitionError> for ClientError {
    fn from(err: DefinitionError) -> Self {
        ClientError::Definition(err.into())
    }
}

impl ClientError {
    /// The remote status code, when the server answered with an error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
