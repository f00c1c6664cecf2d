use serde::Serialize;

/// Any failure that escapes the pipeline. Serializes as the full context
/// chain of the wrapped error on one line.
#[derive(Debug)]
pub struct StylerError(pub anyhow::Error);

impl std::fmt::Display for StylerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for StylerError {}

impl Serialize for StylerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<anyhow::Error> for StylerError {
    fn from(error: anyhow::Error) -> Self {
        Self(error)
    }
}
