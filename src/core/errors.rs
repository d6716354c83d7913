use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failures of a remote-site run.
///
/// An empty result set is *not* an error; it is a successful run with no records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("account is logged in elsewhere: {0}")]
    AuthCollision(String),
    #[error("navigation timed out during {step}: {detail}")]
    NavigationTimeout { step: String, detail: String },
    #[error("results container unavailable: {0}")]
    ExtractionUnavailable(String),
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

/// Compact classification of a [`DriverError`], carried by `JobStatus::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    AuthFailure,
    AuthCollision,
    NavigationTimeout,
    ExtractionUnavailable,
    Unknown,
}

impl DriverError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DriverError::Configuration(_) => FailureKind::Configuration,
            DriverError::AuthFailure(_) => FailureKind::AuthFailure,
            DriverError::AuthCollision(_) => FailureKind::AuthCollision,
            DriverError::NavigationTimeout { .. } => FailureKind::NavigationTimeout,
            DriverError::ExtractionUnavailable(_) => FailureKind::ExtractionUnavailable,
            DriverError::Unknown(_) => FailureKind::Unknown,
        }
    }

    pub fn timeout(step: impl Into<String>, detail: impl Into<String>) -> Self {
        DriverError::NavigationTimeout {
            step: step.into(),
            detail: detail.into(),
        }
    }
}

impl From<anyhow::Error> for DriverError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<DriverError>() {
            Ok(typed) => typed,
            Err(other) => DriverError::Unknown(format!("{:#}", other)),
        }
    }
}

impl FailureKind {
    /// Message shown to the end user for this failure.
    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::Configuration => {
                "システムの設定に問題があるため検索できませんでした。管理者にお問い合わせください。"
            }
            FailureKind::AuthCollision => {
                "オークションサイトのアカウントが別の場所で使用中のため検索できませんでした。しばらくしてからもう一度お試しください。"
            }
            FailureKind::AuthFailure
            | FailureKind::NavigationTimeout
            | FailureKind::ExtractionUnavailable
            | FailureKind::Unknown => {
                "検索中にエラーが発生しました。お手数ですが、もう一度最初から条件を入力してください。"
            }
        }
    }
}
