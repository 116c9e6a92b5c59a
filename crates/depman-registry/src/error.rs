#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("network error talking to registry: {0}")]
    Network(#[from] curl::Error),

    #[error("registry returned malformed JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    #[error("registry returned HTTP {0}")]
    HttpStatus(u32),

    #[error("registry response was missing the `{0}` header")]
    MissingHeader(&'static str),

    #[error("registry response checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("invalid registry URL: {0}")]
    Url(#[from] url::ParseError),
}
