use std::str::FromStr;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::amount::{NATIVE_DECIMALS, format_amount};

/// `0x` followed by 40 hex digits.
pub const ADDRESS_LEN: usize = 42;
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const MESSAGE_PLACEHOLDER: &str = "ipfs://";

pub fn is_address_syntax(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.len() == ADDRESS_LEN
        && trimmed.starts_with("0x")
        && trimmed[2..].bytes().all(|byte| byte.is_ascii_hexdigit())
}

pub fn normalize_address(value: &str) -> Option<String> {
    if !is_address_syntax(value) {
        return None;
    }
    Some(value.trim().to_ascii_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Native,
    Token,
}

impl AssetType {
    pub fn from_code(code: U256) -> Self {
        if code == U256::from(1u8) {
            AssetType::Token
        } else {
            if code > U256::from(1u8) {
                warn!(%code, "Unknown asset type code, treating as native");
            }
            AssetType::Native
        }
    }
}

/// Fixed field order of the positional form of a gift record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GiftField {
    Sender = 0,
    Recipient = 1,
    UnlockTime = 2,
    AssetType = 3,
    Token = 4,
    Amount = 5,
    EncryptedMessageUri = 6,
    Claimed = 7,
}

pub const GIFT_FIELD_COUNT: usize = 8;

/// A gift record exactly as a reader produced it: either an object with the
/// contract's field names or an 8-element tuple in contract field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawGift {
    Positional(Vec<Value>),
    Named(NamedGift),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedGift {
    #[serde(default)]
    pub sender: Option<Value>,
    #[serde(default)]
    pub recipient: Option<Value>,
    #[serde(default)]
    pub unlock_time: Option<Value>,
    #[serde(default)]
    pub asset_type: Option<Value>,
    #[serde(default)]
    pub token: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default, rename = "encryptedMessageURI")]
    pub encrypted_message_uri: Option<Value>,
    #[serde(default)]
    pub claimed: Option<Value>,
}

impl RawGift {
    fn field(&self, field: GiftField) -> Option<&Value> {
        let value = match self {
            RawGift::Named(named) => match field {
                GiftField::Sender => named.sender.as_ref(),
                GiftField::Recipient => named.recipient.as_ref(),
                GiftField::UnlockTime => named.unlock_time.as_ref(),
                GiftField::AssetType => named.asset_type.as_ref(),
                GiftField::Token => named.token.as_ref(),
                GiftField::Amount => named.amount.as_ref(),
                GiftField::EncryptedMessageUri => named.encrypted_message_uri.as_ref(),
                GiftField::Claimed => named.claimed.as_ref(),
            },
            RawGift::Positional(values) => values.get(field as usize),
        };
        value.filter(|value| !value.is_null())
    }
}

/// Normalized, strongly typed gift record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftRecord {
    pub id: u64,
    pub sender: String,
    pub recipient: String,
    pub unlock_time: U256,
    pub asset_type: AssetType,
    pub token: String,
    pub amount: U256,
    pub encrypted_message_uri: String,
    pub claimed: bool,
}

impl GiftRecord {
    /// The single normalization boundary between reader output and typed
    /// records. Both shapes go through the same per-field coercion.
    pub fn from_raw(id: u64, raw: &RawGift) -> Self {
        if let RawGift::Positional(values) = raw {
            if values.len() != GIFT_FIELD_COUNT {
                warn!(
                    gift_id = id,
                    fields = values.len(),
                    "Positional gift record has unexpected arity"
                );
            }
        }

        let token = coerce_address(raw.field(GiftField::Token));
        Self {
            id,
            sender: coerce_address(raw.field(GiftField::Sender)),
            recipient: coerce_address(raw.field(GiftField::Recipient)),
            unlock_time: coerce_u256(raw.field(GiftField::UnlockTime)),
            asset_type: AssetType::from_code(coerce_u256(raw.field(GiftField::AssetType))),
            token: if token.is_empty() {
                ZERO_ADDRESS.to_string()
            } else {
                token
            },
            amount: coerce_u256(raw.field(GiftField::Amount)),
            encrypted_message_uri: coerce_string(raw.field(GiftField::EncryptedMessageUri)),
            claimed: coerce_bool(raw.field(GiftField::Claimed)),
        }
    }

    /// Records past the populated range come back zeroed; a real record
    /// always carries a full-length, non-zero sender.
    pub fn exists(&self) -> bool {
        !self.sender.is_empty() && self.sender != ZERO_ADDRESS && self.sender.len() >= ADDRESS_LEN
    }

    pub fn is_addressed_to(&self, address: &str) -> bool {
        let wanted = address.trim().to_ascii_lowercase();
        self.recipient.len() == ADDRESS_LEN && self.recipient == wanted
    }

    pub fn unlock_time_ms(&self) -> Option<i64> {
        if self.unlock_time.is_zero() {
            return None;
        }
        let seconds = u64::try_from(self.unlock_time).unwrap_or(u64::MAX);
        let millis = i64::try_from(seconds)
            .ok()
            .and_then(|seconds| seconds.checked_mul(1_000))
            .unwrap_or(i64::MAX);
        Some(millis)
    }
}

/// Presentation view of a gift addressed to the connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGift {
    pub id: u64,
    pub sender: String,
    pub recipient: String,
    pub amount: String,
    pub amount_raw: String,
    pub unlock_time_ms: Option<i64>,
    #[serde(rename = "encryptedMessageURI")]
    pub encrypted_message_uri: String,
    pub claimed: bool,
    pub asset_type: AssetType,
    pub token: String,
}

impl UserGift {
    pub fn from_record(record: &GiftRecord, token_decimals: u8) -> Self {
        let decimals = match record.asset_type {
            AssetType::Native => NATIVE_DECIMALS,
            AssetType::Token => token_decimals,
        };
        Self {
            id: record.id,
            sender: record.sender.clone(),
            recipient: record.recipient.clone(),
            amount: format_amount(record.amount, decimals),
            amount_raw: record.amount.to_string(),
            unlock_time_ms: record.unlock_time_ms(),
            encrypted_message_uri: record.encrypted_message_uri.clone(),
            claimed: record.claimed,
            asset_type: record.asset_type,
            token: record.token.clone(),
        }
    }

    pub fn unlock_at(&self) -> Option<DateTime<Utc>> {
        self.unlock_time_ms.and_then(DateTime::from_timestamp_millis)
    }

    /// Unlocked once wall-clock time reaches the unlock instant. A gift
    /// without an unlock time is never reported as unlocked.
    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        match self.unlock_at() {
            Some(unlock_at) => now >= unlock_at,
            None => false,
        }
    }
}

/// Accepts JSON numbers, decimal or `0x` strings, JS-style `123n` literals
/// and `{ "hex": "0x.." }` big-number objects. Anything else becomes zero.
pub fn coerce_u256(value: Option<&Value>) -> U256 {
    let Some(value) = value else {
        return U256::ZERO;
    };

    let parsed = match value {
        Value::Number(number) => {
            if let Some(unsigned) = number.as_u64() {
                Some(U256::from(unsigned))
            } else {
                number
                    .as_f64()
                    .filter(|float| float.is_finite() && *float >= 0.0 && float.fract() == 0.0)
                    .filter(|float| *float < u128::MAX as f64)
                    .map(|float| U256::from(float as u128))
            }
        }
        Value::String(text) => parse_u256_text(text),
        Value::Object(map) => map
            .get("hex")
            .or_else(|| map.get("_hex"))
            .and_then(Value::as_str)
            .and_then(parse_u256_text),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        warn!(%value, "Unable to coerce value to an integer, substituting zero");
        U256::ZERO
    })
}

fn parse_u256_text(text: &str) -> Option<U256> {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_suffix('n').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str(trimmed).ok()
}

pub fn coerce_address(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.trim().to_ascii_lowercase(),
        _ => String::new(),
    }
}

pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_u64().is_some_and(|n| n != 0),
        Some(Value::String(text)) => matches!(text.trim(), "true" | "1"),
        _ => false,
    }
}
