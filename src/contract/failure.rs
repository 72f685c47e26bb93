use std::time::Duration;

const PAUSED_MARKER: &str = "circuit breaker";
const REVERT_MARKER: &str = "revert";

pub const PAUSED_NOTICE_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_secs(5);

/// Why a create or claim write did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteFailure {
    #[error("contract is paused: {detail}")]
    ContractPaused { detail: String },
    #[error("transaction reverted{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Reverted { reason: Option<String> },
    #[error("{0}")]
    Other(String),
}

impl WriteFailure {
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains(PAUSED_MARKER) {
            return WriteFailure::ContractPaused {
                detail: message.trim().to_string(),
            };
        }
        if lowered.contains(REVERT_MARKER) {
            return WriteFailure::Reverted {
                reason: extract_revert_reason(message),
            };
        }
        WriteFailure::Other(message.trim().to_string())
    }

    pub fn is_contract_paused(&self) -> bool {
        matches!(self, WriteFailure::ContractPaused { .. })
    }

    pub fn notice(&self, action: WriteAction) -> Notice {
        match self {
            WriteFailure::ContractPaused { .. } => Notice {
                level: NoticeLevel::Error,
                message: format!(
                    "{} is unavailable: the gift contract is temporarily paused (circuit breaker is open). \
                     No funds were moved. Please try again later.",
                    action.label()
                ),
                duration: PAUSED_NOTICE_DURATION,
            },
            WriteFailure::Reverted {
                reason: Some(reason),
            } => Notice {
                level: NoticeLevel::Error,
                message: format!("{} failed: {reason}", action.label()),
                duration: DEFAULT_NOTICE_DURATION,
            },
            WriteFailure::Reverted { reason: None } => Notice {
                level: NoticeLevel::Error,
                message: format!("{} failed: transaction reverted", action.label()),
                duration: DEFAULT_NOTICE_DURATION,
            },
            WriteFailure::Other(message) => Notice {
                level: NoticeLevel::Error,
                message: if message.is_empty() {
                    action.fallback_message().to_string()
                } else {
                    message.clone()
                },
                duration: DEFAULT_NOTICE_DURATION,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    CreateGift,
    ClaimGift,
}

impl WriteAction {
    fn label(self) -> &'static str {
        match self {
            WriteAction::CreateGift => "Creating the gift",
            WriteAction::ClaimGift => "Claiming the gift",
        }
    }

    fn fallback_message(self) -> &'static str {
        match self {
            WriteAction::CreateGift => "Failed to create gift box",
            WriteAction::ClaimGift => "Failed to claim gift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Transient user-facing message with the time it should stay visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub duration: Duration,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            duration: DEFAULT_NOTICE_DURATION,
        }
    }
}

/// Text following `revert`/`reverted` (and an optional `:`), cut at the first
/// quote or line break.
fn extract_revert_reason(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    let start = lowered.find(REVERT_MARKER)?;
    let mut rest = &message[start + REVERT_MARKER.len()..];
    if rest.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("ed")) {
        rest = &rest[2..];
    }
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    let rest = rest.strip_prefix("with reason string").unwrap_or(rest);
    let end = rest.find(['"', '\n', '\r']).unwrap_or(rest.len());
    let reason = rest[..end]
        .trim()
        .trim_matches(|c: char| c == '\'' || c == '`')
        .trim();
    if reason.is_empty() {
        None
    } else {
        Some(reason.to_string())
    }
}
