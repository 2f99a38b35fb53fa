//! Typed response shapes for the TTN v3 API.
//!
//! Each endpoint the pipeline touches gets a small typed shape instead of a
//! loosely-typed map, so the classifier and orchestrators can pattern-match
//! exhaustively. Unknown fields are ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The independent server roles that each hold a mirror of a device record.
///
/// Deleting a device from the identity registry alone does not release its
/// DevEUI; every role must be told to forget the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    /// Identity Server: the registry of record.
    Identity,
    /// Network Server: MAC state and session keys.
    Network,
    /// Application Server: uplink/downlink payload handling.
    Application,
    /// Join Server: root keys and join accept.
    Join,
}

impl ServerRole {
    /// All roles in the order deprovisioning visits them.
    pub const ALL: [ServerRole; 4] = [
        ServerRole::Identity,
        ServerRole::Network,
        ServerRole::Application,
        ServerRole::Join,
    ];

    /// API path prefix for this role, e.g. `/ns` for the Network Server.
    #[must_use]
    pub fn path_prefix(&self) -> &'static str {
        match self {
            ServerRole::Identity => "",
            ServerRole::Network => "/ns",
            ServerRole::Application => "/as",
            ServerRole::Join => "/js",
        }
    }

    /// Short name used in audit step labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Identity => "is",
            ServerRole::Network => "ns",
            ServerRole::Application => "as",
            ServerRole::Join => "js",
        }
    }
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers of an end device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndDeviceIds {
    /// TTN device id, e.g. `eui-aabbccddeeff0011`.
    #[serde(default)]
    pub device_id: String,
    /// Hardware DevEUI, 16 hex characters.
    #[serde(default)]
    pub dev_eui: Option<String>,
}

/// A registered end device (subset the pipeline needs).
#[derive(Debug, Clone, Deserialize)]
pub struct EndDevice {
    /// Device identifiers.
    pub ids: EndDeviceIds,
}

/// One page of a device listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceListPage {
    /// Devices on this page.
    #[serde(default)]
    pub end_devices: Vec<EndDevice>,
    /// Opaque token for the next page, absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Result of the cross-device DevEUI search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndDeviceSearchResult {
    /// Matching devices (empty means the DevEUI is released).
    #[serde(default)]
    pub end_devices: Vec<EndDevice>,
}

/// A freshly created API key. The `key` value is shown exactly once.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyCreated {
    /// Key id, retrievable later.
    pub id: String,
    /// The secret key material. Never logged; encrypted at rest.
    pub key: String,
}

/// Gateway connection statistics from the Gateway Server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionStats {
    /// When the gateway connected.
    #[serde(default)]
    pub connected_at: Option<String>,
    /// Last uplink seen from the gateway.
    #[serde(default)]
    pub last_uplink_received_at: Option<String>,
    /// Last status message seen from the gateway.
    #[serde(default)]
    pub last_status_received_at: Option<String>,
    /// Round-trip times, as Go-style duration strings.
    #[serde(default)]
    pub round_trip_times: Option<RoundTripTimes>,
}

/// Round-trip time summary with Go-style duration strings (`"42ms"`, `"1.2s"`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoundTripTimes {
    #[serde(default)]
    pub min: Option<String>,
    #[serde(default)]
    pub max: Option<String>,
    #[serde(default)]
    pub median: Option<String>,
}

impl RoundTripTimes {
    /// Parsed median round-trip time, if present and well-formed.
    #[must_use]
    pub fn median_duration(&self) -> Option<Duration> {
        self.median.as_deref().and_then(parse_go_duration)
    }
}

/// Parse a Go-style duration string such as `"250ms"`, `"1.5s"` or `"1m30s"`.
///
/// Supports the suffixes Go emits for connection stats: `ns`, `us`, `ms`,
/// `s`, `m`, `h`. Returns `None` for empty or malformed input.
#[must_use]
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let value: f64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let (multiplier_secs, consumed) = if rest.starts_with("ns") {
            (1e-9, 2)
        } else if rest.starts_with("us") || rest.starts_with("µs") {
            (1e-6, if rest.starts_with("µs") { 3 } else { 2 })
        } else if rest.starts_with("ms") {
            (1e-3, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return None;
        };
        rest = &rest[consumed..];

        let secs = value * multiplier_secs;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        total += Duration::from_secs_f64(secs);
    }

    Some(total)
}

/// Normalize a DevEUI for comparison: strip separators, uppercase hex.
///
/// Returns `None` unless the result is exactly 16 hex characters.
#[must_use]
pub fn normalize_dev_eui(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect::<String>()
        .to_uppercase();

    if cleaned.len() == 16 && cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(cleaned)
    } else {
        None
    }
}

/// Derive the TTN device id for a DevEUI: `eui-<deveui lowercase>`.
#[must_use]
pub fn device_id_for_eui(dev_eui: &str) -> String {
    format!("eui-{}", dev_eui.to_lowercase())
}

/// Derive the TTN gateway id for a gateway EUI: `fg-gw-<last 8, lowercase>`.
///
/// Expects a normalized 16-hex-character EUI.
#[must_use]
pub fn gateway_id_for_eui(gateway_eui: &str) -> String {
    let tail: String = gateway_eui
        .chars()
        .skip(gateway_eui.chars().count().saturating_sub(8))
        .collect();
    format!("fg-gw-{}", tail.to_lowercase())
}

/// Identifiers of a registered gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayIds {
    /// TTN gateway id, e.g. `fg-gw-a00009ef`.
    #[serde(default)]
    pub gateway_id: String,
    /// Hardware gateway EUI, 16 hex characters.
    #[serde(default)]
    pub eui: Option<String>,
}

/// A registered gateway (subset the pipeline needs).
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRecord {
    /// Gateway identifiers.
    pub ids: GatewayIds,
}

/// One page of a gateway listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayListPage {
    /// Gateways on this page.
    #[serde(default)]
    pub gateways: Vec<GatewayRecord>,
    /// Opaque token for the next page, absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_prefixes() {
        assert_eq!(ServerRole::Identity.path_prefix(), "");
        assert_eq!(ServerRole::Network.path_prefix(), "/ns");
        assert_eq!(ServerRole::Application.path_prefix(), "/as");
        assert_eq!(ServerRole::Join.path_prefix(), "/js");
        assert_eq!(ServerRole::ALL.len(), 4);
    }

    #[test]
    fn test_parse_go_duration_simple() {
        assert_eq!(
            parse_go_duration("250ms"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(parse_go_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(
            parse_go_duration("1.5s"),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_parse_go_duration_compound() {
        assert_eq!(
            parse_go_duration("1m30s"),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            parse_go_duration("1h2m"),
            Some(Duration::from_secs(3720))
        );
    }

    #[test]
    fn test_parse_go_duration_invalid() {
        assert_eq!(parse_go_duration(""), None);
        assert_eq!(parse_go_duration("ms"), None);
        assert_eq!(parse_go_duration("5x"), None);
        assert_eq!(parse_go_duration("--"), None);
    }

    #[test]
    fn test_normalize_dev_eui() {
        assert_eq!(
            normalize_dev_eui("aa:bb:cc:dd:ee:ff:00:11").as_deref(),
            Some("AABBCCDDEEFF0011")
        );
        assert_eq!(
            normalize_dev_eui("AABBCCDDEEFF0011").as_deref(),
            Some("AABBCCDDEEFF0011")
        );
        assert_eq!(normalize_dev_eui("AABB"), None);
        assert_eq!(normalize_dev_eui("ZZBBCCDDEEFF0011"), None);
    }

    #[test]
    fn test_device_id_for_eui() {
        assert_eq!(
            device_id_for_eui("AABBCCDDEEFF0011"),
            "eui-aabbccddeeff0011"
        );
    }

    #[test]
    fn test_gateway_id_for_eui() {
        assert_eq!(gateway_id_for_eui("00800000A00009EF"), "fg-gw-a00009ef");
    }

    #[test]
    fn test_gateway_list_page_decodes() {
        let page: GatewayListPage = serde_json::from_value(serde_json::json!({
            "gateways": [
                {"ids": {"gateway_id": "fg-gw-a00009ef", "eui": "00800000A00009EF"}}
            ]
        }))
        .unwrap();
        assert_eq!(page.gateways.len(), 1);
        assert_eq!(page.gateways[0].ids.gateway_id, "fg-gw-a00009ef");
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_round_trip_times_median() {
        let rtt = RoundTripTimes {
            min: Some("10ms".into()),
            max: Some("1s".into()),
            median: Some("42ms".into()),
        };
        assert_eq!(rtt.median_duration(), Some(Duration::from_millis(42)));
    }

    #[test]
    fn test_device_list_page_decodes() {
        let page: DeviceListPage = serde_json::from_value(serde_json::json!({
            "end_devices": [
                {"ids": {"device_id": "eui-aabbccddeeff0011", "dev_eui": "AABBCCDDEEFF0011"}}
            ],
            "next_page_token": "abc"
        }))
        .unwrap();
        assert_eq!(page.end_devices.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }
}
