use std::fmt::Write as _;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::discovery::{DiscoverySnapshot, DiscoveryStats};
use crate::models::amount::format_amount_short;
use crate::models::gift::{AssetType, MESSAGE_PLACEHOLDER, UserGift};

const ENCRYPTED_MESSAGE_LABEL: &str = "Encrypted message available";

/// `0x1234...abcd`; anything too short to elide is returned unchanged.
pub fn format_address(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.len() <= 10 || !trimmed.is_ascii() {
        return trimmed.to_string();
    }
    format!("{}...{}", &trimmed[..6], &trimmed[trimmed.len() - 4..])
}

pub fn format_countdown(remaining: chrono::Duration) -> String {
    let total_minutes = remaining.num_minutes();
    if total_minutes < 1 {
        return "less than a minute".to_string();
    }
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn amount_label(gift: &UserGift) -> String {
    let amount = format_amount_short(&gift.amount);
    match gift.asset_type {
        AssetType::Native => format!("{amount} ETH"),
        AssetType::Token => format!("{amount} (ERC-20 Token {})", format_address(&gift.token)),
    }
}

/// The bare placeholder is hidden; other `ipfs://` URIs are announced but
/// not shown.
pub fn message_label(uri: &str) -> Option<String> {
    let trimmed = uri.trim();
    if trimmed.is_empty() || trimmed == MESSAGE_PLACEHOLDER {
        return None;
    }
    if trimmed.starts_with(MESSAGE_PLACEHOLDER) {
        return Some(ENCRYPTED_MESSAGE_LABEL.to_string());
    }
    Some(trimmed.to_string())
}

pub fn status_text(gift: &UserGift, now: DateTime<Utc>) -> String {
    if gift.claimed {
        return "Claimed".to_string();
    }
    match gift.unlock_at() {
        None => "No unlock time set".to_string(),
        Some(unlock_at) if now >= unlock_at => "Unlocked & ready to claim".to_string(),
        Some(unlock_at) => format!(
            "Unlocks in {} ({})",
            format_countdown(unlock_at - now),
            unlock_at.format("%Y-%m-%d %H:%M UTC")
        ),
    }
}

pub fn render_gift(gift: &UserGift, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Gift #{}  {}", gift.id, amount_label(gift));
    let _ = writeln!(out, "  From:   {}", format_address(&gift.sender));
    let _ = writeln!(out, "  Status: {}", status_text(gift, now));
    if let Some(label) = message_label(&gift.encrypted_message_uri) {
        let _ = writeln!(out, "  Note:   {label}");
    }
    out
}

pub fn render_listing(snapshot: &DiscoverySnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if snapshot.gifts.is_empty() {
        if snapshot.is_loading {
            out.push_str("Loading gifts...\n");
        } else {
            out.push_str("No gifts yet\n");
        }
    }
    for gift in &snapshot.gifts {
        out.push_str(&render_gift(gift, now));
    }
    if let Some(error) = &snapshot.error {
        let _ = writeln!(out, "Warning: some gifts could not be read ({error})");
    }
    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GiftView<'a> {
    #[serde(flatten)]
    gift: &'a UserGift,
    unlocked: bool,
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListingView<'a> {
    gifts: Vec<GiftView<'a>>,
    is_loading: bool,
    error: Option<&'a str>,
    stats: &'a DiscoveryStats,
}

pub fn render_listing_json(snapshot: &DiscoverySnapshot, now: DateTime<Utc>) -> Result<String> {
    let view = ListingView {
        gifts: snapshot
            .gifts
            .iter()
            .map(|gift| GiftView {
                gift,
                unlocked: gift.is_unlocked(now),
                status: status_text(gift, now),
            })
            .collect(),
        is_loading: snapshot.is_loading,
        error: snapshot.error.as_deref(),
        stats: &snapshot.stats,
    };
    serde_json::to_string_pretty(&view).context("Failed to serialize gift listing")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gift::ZERO_ADDRESS;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn gift(unlock_offset_secs: i64, claimed: bool) -> UserGift {
        UserGift {
            id: 7,
            sender: "0x1234567890abcdef1234567890abcdef1234abcd".to_string(),
            recipient: "0x2222222222222222222222222222222222222222".to_string(),
            amount: "1.5".to_string(),
            amount_raw: "1500000000000000000".to_string(),
            unlock_time_ms: Some((now().timestamp() + unlock_offset_secs) * 1_000),
            encrypted_message_uri: "ipfs://bafyabc".to_string(),
            claimed,
            asset_type: AssetType::Native,
            token: ZERO_ADDRESS.to_string(),
        }
    }

    #[test]
    fn addresses_are_shortened() {
        assert_eq!(
            format_address("0x1234567890abcdef1234567890abcdef1234abcd"),
            "0x1234...abcd"
        );
        assert_eq!(format_address("0x12"), "0x12");
        assert_eq!(format_address(""), "");
    }

    #[test]
    fn countdowns() {
        let span = Duration::days(2) + Duration::hours(3) + Duration::minutes(4) + Duration::seconds(59);
        assert_eq!(format_countdown(span), "2d 3h 4m");
        assert_eq!(format_countdown(Duration::minutes(90)), "1h 30m");
        assert_eq!(format_countdown(Duration::minutes(5)), "5m");
        assert_eq!(format_countdown(Duration::seconds(30)), "less than a minute");
        assert_eq!(format_countdown(Duration::days(1)), "1d 0h 0m");
    }

    #[test]
    fn message_labels() {
        assert_eq!(message_label("ipfs://"), None);
        assert_eq!(message_label("  "), None);
        assert_eq!(
            message_label("ipfs://bafyabc").as_deref(),
            Some("Encrypted message available")
        );
        assert_eq!(message_label("Happy birthday").as_deref(), Some("Happy birthday"));
    }

    #[test]
    fn status_reflects_lock_state() {
        assert_eq!(status_text(&gift(-10, false), now()), "Unlocked & ready to claim");
        assert_eq!(status_text(&gift(-10, true), now()), "Claimed");
        assert!(status_text(&gift(3_600, false), now()).starts_with("Unlocks in 1h 0m"));

        let mut timeless = gift(0, false);
        timeless.unlock_time_ms = None;
        assert_eq!(status_text(&timeless, now()), "No unlock time set");
    }

    #[test]
    fn amounts_show_four_places_and_asset() {
        let native = gift(0, false);
        assert_eq!(amount_label(&native), "1.5000 ETH");

        let mut token = gift(0, false);
        token.asset_type = AssetType::Token;
        token.token = "0x3333333333333333333333333333333333333333".to_string();
        assert_eq!(amount_label(&token), "1.5000 (ERC-20 Token 0x3333...3333)");
    }

    #[test]
    fn listing_text_and_json() {
        let snapshot = DiscoverySnapshot {
            gifts: vec![gift(-10, false)],
            ..DiscoverySnapshot::default()
        };
        let text = render_listing(&snapshot, now());
        assert!(text.contains("Gift #7  1.5000 ETH"));
        assert!(text.contains("From:   0x1234...abcd"));
        assert!(text.contains("Encrypted message available"));

        let json: serde_json::Value =
            serde_json::from_str(&render_listing_json(&snapshot, now()).unwrap()).unwrap();
        assert_eq!(json["gifts"][0]["id"], 7);
        assert_eq!(json["gifts"][0]["unlocked"], true);
        assert_eq!(json["gifts"][0]["encryptedMessageURI"], "ipfs://bafyabc");
        assert_eq!(json["isLoading"], false);

        let empty = render_listing(&DiscoverySnapshot::default(), now());
        assert_eq!(empty, "No gifts yet\n");
    }
}
