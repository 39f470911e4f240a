use thiserror::Error;

/// Rejections raised before any remote call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a message.")]
    EmptyText,
    #[error("Please enter a nickname.")]
    MissingName,
}

/// Every failure the page can surface. None of them is fatal: the countdown
/// and the bubbles already on screen keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlessingError {
    #[error("remote store credentials are missing")]
    ConfigurationMissing,
    #[error("failed loading blessings: {0}")]
    FetchFailure(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed sending blessing: {0}")]
    SubmissionFailure(String),
}

impl BlessingError {
    /// Status line shown under the form.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConfigurationMissing => {
                "Supabase settings are missing. Check SUPABASE_URL and SUPABASE_ANON_KEY.".to_owned()
            }
            Self::FetchFailure(_) => "Couldn't load blessings. Please try again later.".to_owned(),
            Self::Validation(err) => err.to_string(),
            Self::SubmissionFailure(_) => {
                "Something went wrong while sending. Please try again.".to_owned()
            }
        }
    }

    /// Missing configuration never clears; everything else is transient.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::ConfigurationMissing)
    }
}
