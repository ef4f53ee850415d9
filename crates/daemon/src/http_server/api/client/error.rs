use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
}

impl ApiError {
    /// True when the agent could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ApiError::Reqwest(e) if e.is_connect() || e.is_timeout())
    }
}
