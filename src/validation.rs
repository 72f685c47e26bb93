use alloy::primitives::U256;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

use crate::models::amount::{NATIVE_DECIMALS, parse_amount};
use crate::models::gift::{MESSAGE_PLACEHOLDER, UserGift, normalize_address};
use crate::session::WalletSession;

/// 0.000001 ETH.
pub const MIN_GIFT_AMOUNT_WEI: U256 = U256::from_limbs([1_000_000_000_000, 0, 0, 0]);
/// 1000 ETH.
pub const MAX_GIFT_AMOUNT_WEI: U256 = U256::from_limbs([0x35c9_adc5_dea0_0000, 0x36, 0, 0]);
pub const MAX_LOCK_DAYS: i64 = 365;

const LOCAL_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingFields,
    #[error("Invalid recipient address")]
    InvalidRecipient,
    #[error("You cannot send a gift to yourself")]
    SelfGift,
    #[error("Amount must be a number greater than 0")]
    InvalidAmount,
    #[error("Amount must be at least 0.000001 ETH")]
    AmountBelowMinimum,
    #[error("Amount cannot exceed 1000 ETH")]
    AmountAboveMaximum,
    #[error("Invalid token address")]
    InvalidToken,
    #[error("Unlock time is not a valid date and time")]
    InvalidUnlockTime,
    #[error("Unlock time must be in the future")]
    UnlockTimeNotInFuture,
    #[error("Unlock time cannot be more than one year in the future")]
    UnlockTimeTooFar,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimRejection {
    #[error("Gift #{0} is not addressed to this wallet")]
    NotFound(u64),
    #[error("Gift #{0} has already been claimed")]
    AlreadyClaimed(u64),
    #[error("Gift #{0} has no unlock time")]
    NoUnlockTime(u64),
    #[error("Gift #{id} is still locked until {unlock_at}")]
    StillLocked { id: u64, unlock_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDraft {
    pub address: String,
    pub decimals: u8,
}

/// Raw form input for a new gift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GiftDraft {
    pub recipient: String,
    pub amount: String,
    pub unlock: String,
    pub message: String,
    pub token: Option<TokenDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedGift {
    pub recipient: String,
    pub amount: String,
    pub amount_units: U256,
    pub unlock_time: u64,
    pub message_uri: String,
    pub token: Option<TokenDraft>,
}

/// Runs the create checks in order; the first failure wins.
pub fn validate_gift(
    draft: &GiftDraft,
    session: &WalletSession,
    now: DateTime<Utc>,
) -> Result<ValidatedGift, ValidationError> {
    let recipient = draft.recipient.trim();
    let amount = draft.amount.trim();
    let unlock = draft.unlock.trim();
    if recipient.is_empty() || amount.is_empty() || unlock.is_empty() {
        return Err(ValidationError::MissingFields);
    }

    let recipient = normalize_address(recipient).ok_or(ValidationError::InvalidRecipient)?;
    if session.is_own_address(&recipient) {
        return Err(ValidationError::SelfGift);
    }

    let decimals = draft
        .token
        .as_ref()
        .map_or(NATIVE_DECIMALS, |token| token.decimals);
    let amount_units = parse_amount(amount, decimals).map_err(|_| ValidationError::InvalidAmount)?;
    if amount_units.is_zero() {
        return Err(ValidationError::InvalidAmount);
    }

    let token = match &draft.token {
        Some(token) => Some(TokenDraft {
            address: normalize_address(&token.address).ok_or(ValidationError::InvalidToken)?,
            decimals: token.decimals,
        }),
        None => {
            if amount_units < MIN_GIFT_AMOUNT_WEI {
                return Err(ValidationError::AmountBelowMinimum);
            }
            if amount_units > MAX_GIFT_AMOUNT_WEI {
                return Err(ValidationError::AmountAboveMaximum);
            }
            None
        }
    };

    let unlock_at = parse_unlock_time(unlock).ok_or(ValidationError::InvalidUnlockTime)?;
    let unlock_time = unlock_at.timestamp();
    if unlock_time <= now.timestamp() {
        return Err(ValidationError::UnlockTimeNotInFuture);
    }
    if unlock_at > now + Duration::days(MAX_LOCK_DAYS) {
        return Err(ValidationError::UnlockTimeTooFar);
    }

    let message = draft.message.trim();
    let message_uri = if message.is_empty() {
        MESSAGE_PLACEHOLDER.to_string()
    } else {
        message.to_string()
    };

    Ok(ValidatedGift {
        recipient,
        amount: amount.to_string(),
        amount_units,
        unlock_time: unlock_time as u64,
        message_uri,
        token,
    })
}

/// Accepts RFC 3339, a `datetime-local` style value in the local zone, or a
/// bare count of Unix seconds.
pub fn parse_unlock_time(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        let seconds: i64 = trimmed.parse().ok()?;
        return DateTime::from_timestamp(seconds, 0);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    LOCAL_DATETIME_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(trimmed, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

/// Local pre-flight for a claim. The contract is only contacted when this
/// returns the gift.
pub fn check_claimable(
    gifts: &[UserGift],
    id: u64,
    now: DateTime<Utc>,
) -> Result<&UserGift, ClaimRejection> {
    let gift = gifts
        .iter()
        .find(|gift| gift.id == id)
        .ok_or(ClaimRejection::NotFound(id))?;
    if gift.claimed {
        return Err(ClaimRejection::AlreadyClaimed(id));
    }
    let unlock_at = gift.unlock_at().ok_or(ClaimRejection::NoUnlockTime(id))?;
    if now < unlock_at {
        return Err(ClaimRejection::StillLocked { id, unlock_at });
    }
    Ok(gift)
}
