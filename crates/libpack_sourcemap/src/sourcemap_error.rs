use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceMapError {
  #[error("Source index out of range")]
  SourceOutOfRange,
  #[error("Name index out of range")]
  NameOutOfRange,
  #[error("Unexpected negative number: {0}")]
  UnexpectedNegativeNumber(&'static str),
  #[error("Unexpectedly big number: {0}")]
  UnexpectedlyBigNumber(&'static str),
  #[error("Invalid VLQ mapping")]
  VlqInvalidBase64,
  #[error("VLQ mapping ended unexpectedly")]
  VlqUnexpectedEof,
  #[error("VLQ value overflowed")]
  VlqOverflow,
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("Invalid source map json: {0}")]
  Json(#[from] serde_json::Error),
}

impl From<vlq::Error> for SourceMapError {
  fn from(error: vlq::Error) -> Self {
    match error {
      vlq::Error::UnexpectedEof => SourceMapError::VlqUnexpectedEof,
      vlq::Error::InvalidBase64(_) => SourceMapError::VlqInvalidBase64,
      vlq::Error::Overflow => SourceMapError::VlqOverflow,
    }
  }
}
