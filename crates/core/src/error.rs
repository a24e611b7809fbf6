/// Result alias that carries the custom [`AvatarStageError`] type.
pub type Result<T> = std::result::Result<T, AvatarStageError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AvatarStageError {
    /// Every avatar candidate failed under every backend. Carries the last
    /// error recorded while trying them.
    #[error("avatar acquisition failed: {last}")]
    Acquisition { last: Box<AvatarStageError> },
    /// Audio or archive payload could not be fetched or decoded.
    #[error("failed to decode `{asset}`: {reason}")]
    Decode { asset: String, reason: String },
    /// A newer request for the same resource superseded this one.
    #[error("switch superseded by a newer request")]
    SwitchRejected,
    /// The audio output context refused to resume, usually because no user
    /// gesture has happened yet.
    #[error("audio playback blocked: {0}")]
    PlaybackBlocked(String),
    /// The active avatar backend cannot perform the requested operation.
    #[error("unsupported by the active avatar: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl AvatarStageError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Builds a [`AvatarStageError::Decode`] for `asset`.
    pub fn decode(asset: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            asset: asset.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for AvatarStageError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AvatarStageError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
