//! Pure validators and normalizers for user-supplied event fields.
//!
//! Inbound payloads are loosely typed on the wire; everything string-shaped
//! comes in as a raw JSON value and goes through here before the engines
//! touch it.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Default cap for sanitized strings.
pub const DEFAULT_MAX_STRING: usize = 128;

/// Cap for host identifiers.
pub const HOST_ID_MAX_LEN: usize = 64;

const KEY_MAX_LEN: usize = 64;

/// Trim and truncate a string-valued JSON field. Anything that is not a
/// string becomes the empty string.
pub fn sanitize_string(value: &Value, max_len: usize) -> String {
    match value.as_str() {
        Some(s) => s.trim().chars().take(max_len).collect(),
        None => String::new(),
    }
}

/// Canonical 8-4-4-4-12 hex form, case-insensitive. Other UUID renderings
/// (braced, simple) do not count.
pub fn is_uuid_like(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

/// Derive a suggested host id from a peer id: keep `[A-Za-z0-9_-]`, cap at
/// 20 chars, fall back to a fresh UUID prefix when nothing survives.
pub fn build_suggested_host_id(peer_id: &str) -> String {
    let suffix: String = peer_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(20)
        .collect();
    let suffix = if suffix.is_empty() {
        Uuid::new_v4().to_string().chars().take(8).collect()
    } else {
        suffix
    };
    format!("host-{suffix}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Normalized remote input event, ready to forward host-bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RemoteEvent {
    Move {
        x: f64,
        y: f64,
    },
    Click {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    MouseDown {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    MouseUp {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    Wheel {
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    },
    KeyDown {
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        repeat: bool,
    },
    KeyUp {
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        repeat: bool,
    },
}

/// Validate and normalize a controller input event. Returns `None` for
/// anything malformed; the caller drops those silently.
pub fn sanitize_remote_event(event: &Value) -> Option<RemoteEvent> {
    let obj = event.as_object()?;
    let typ = obj.get("type")?.as_str()?;
    match typ {
        "move" | "click" | "mouse-down" | "mouse-up" | "wheel" => {
            let x = clamp01(finite(obj.get("x"))?);
            let y = clamp01(finite(obj.get("y"))?);
            match typ {
                "move" => Some(RemoteEvent::Move { x, y }),
                "wheel" => Some(RemoteEvent::Wheel {
                    x,
                    y,
                    delta_x: finite(obj.get("deltaX")).unwrap_or(0.0),
                    delta_y: finite(obj.get("deltaY")).unwrap_or(0.0),
                }),
                _ => {
                    let button = match obj.get("button").and_then(Value::as_str) {
                        Some("right") => MouseButton::Right,
                        Some("middle") => MouseButton::Middle,
                        _ => MouseButton::Left,
                    };
                    Some(match typ {
                        "click" => RemoteEvent::Click { x, y, button },
                        "mouse-down" => RemoteEvent::MouseDown { x, y, button },
                        _ => RemoteEvent::MouseUp { x, y, button },
                    })
                }
            }
        }
        "key-down" | "key-up" => {
            let key = nonempty_string(obj.get("key"), KEY_MAX_LEN);
            let code = nonempty_string(obj.get("code"), KEY_MAX_LEN);
            if key.is_none() && code.is_none() {
                return None;
            }
            let repeat = obj.get("repeat").and_then(Value::as_bool).unwrap_or(false);
            Some(if typ == "key-down" {
                RemoteEvent::KeyDown { key, code, repeat }
            } else {
                RemoteEvent::KeyUp { key, code, repeat }
            })
        }
        _ => None,
    }
}

/// Heuristic for "same machine / same LAN" origins. Expects a normalized
/// network id (IPv4-mapped IPv6 prefix is stripped here as well).
pub fn is_likely_private_or_local(network_id: &str) -> bool {
    let id = network_id.trim();
    let id = id.strip_prefix("::ffff:").unwrap_or(id);
    if id == "loopback-local" {
        return true;
    }
    if id.starts_with("10.") || id.starts_with("192.168.") || id.starts_with("169.254.") {
        return true;
    }
    if let Some(rest) = id.strip_prefix("172.") {
        if let Some((octet, _)) = rest.split_once('.') {
            if let Ok(n) = octet.parse::<u8>() {
                if (16..=31).contains(&n) {
                    return true;
                }
            }
        }
    }
    let lower = id.to_ascii_lowercase();
    lower.starts_with("fc") || lower.starts_with("fd")
}

fn finite(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn nonempty_string(value: Option<&Value>, max_len: usize) -> Option<String> {
    let s = sanitize_string(value.unwrap_or(&Value::Null), max_len);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_string_trims_and_truncates() {
        assert_eq!(sanitize_string(&json!("  hello  "), 128), "hello");
        assert_eq!(sanitize_string(&json!("abcdef"), 3), "abc");
        assert_eq!(sanitize_string(&json!(42), 128), "");
        assert_eq!(sanitize_string(&Value::Null, 128), "");
    }

    #[test]
    fn uuid_like_matches_canonical_form_only() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_uuid_like("550E8400-E29B-41D4-A716-446655440000"));
        assert!(!is_uuid_like("550e8400e29b41d4a716446655440000"));
        assert!(!is_uuid_like("550e8400-e29b-41d4-a716-44665544000g"));
        assert!(!is_uuid_like("not-a-uuid"));
    }

    #[test]
    fn suggested_host_id_strips_and_caps() {
        assert_eq!(build_suggested_host_id("p2"), "host-p2");
        assert_eq!(build_suggested_host_id("alice!@#bob"), "host-alicebob");
        assert_eq!(
            build_suggested_host_id("abcdefghijklmnopqrstuvwxyz"),
            "host-abcdefghijklmnopqrst"
        );
        let fallback = build_suggested_host_id("!!!");
        assert!(fallback.starts_with("host-"));
        assert_eq!(fallback.len(), "host-".len() + 8);
    }

    #[test]
    fn pointer_events_clamp_coordinates() {
        let ev = sanitize_remote_event(&json!({"type": "move", "x": 1.5, "y": -0.25})).unwrap();
        assert_eq!(ev, RemoteEvent::Move { x: 1.0, y: 0.0 });
    }

    #[test]
    fn pointer_events_require_finite_coordinates() {
        assert!(sanitize_remote_event(&json!({"type": "move", "x": "a", "y": 0.5})).is_none());
        assert!(sanitize_remote_event(&json!({"type": "click", "y": 0.5})).is_none());
    }

    #[test]
    fn click_button_defaults_to_left() {
        let ev =
            sanitize_remote_event(&json!({"type": "click", "x": 0.5, "y": 0.5})).unwrap();
        assert_eq!(
            ev,
            RemoteEvent::Click {
                x: 0.5,
                y: 0.5,
                button: MouseButton::Left
            }
        );
        let ev = sanitize_remote_event(
            &json!({"type": "mouse-down", "x": 0.0, "y": 0.0, "button": "middle"}),
        )
        .unwrap();
        assert_eq!(
            ev,
            RemoteEvent::MouseDown {
                x: 0.0,
                y: 0.0,
                button: MouseButton::Middle
            }
        );
    }

    #[test]
    fn wheel_deltas_default_to_zero() {
        let ev = sanitize_remote_event(&json!({"type": "wheel", "x": 0.5, "y": 0.5})).unwrap();
        assert_eq!(
            ev,
            RemoteEvent::Wheel {
                x: 0.5,
                y: 0.5,
                delta_x: 0.0,
                delta_y: 0.0
            }
        );
    }

    #[test]
    fn key_events_need_key_or_code() {
        assert!(sanitize_remote_event(&json!({"type": "key-down"})).is_none());
        let ev = sanitize_remote_event(&json!({"type": "key-down", "key": "a"})).unwrap();
        assert_eq!(
            ev,
            RemoteEvent::KeyDown {
                key: Some("a".to_string()),
                code: None,
                repeat: false
            }
        );
        let ev =
            sanitize_remote_event(&json!({"type": "key-up", "code": "KeyA", "repeat": true}))
                .unwrap();
        assert_eq!(
            ev,
            RemoteEvent::KeyUp {
                key: None,
                code: Some("KeyA".to_string()),
                repeat: true
            }
        );
    }

    #[test]
    fn unknown_event_types_are_dropped() {
        assert!(sanitize_remote_event(&json!({"type": "drag", "x": 0.5, "y": 0.5})).is_none());
        assert!(sanitize_remote_event(&json!("move")).is_none());
    }

    #[test]
    fn remote_event_wire_shape() {
        let ev = sanitize_remote_event(
            &json!({"type": "wheel", "x": 0.5, "y": 0.5, "deltaX": 1.0, "deltaY": -2.0}),
        )
        .unwrap();
        let wire = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            wire,
            json!({"type": "wheel", "x": 0.5, "y": 0.5, "deltaX": 1.0, "deltaY": -2.0})
        );
    }

    #[test]
    fn private_or_local_network_detection() {
        assert!(is_likely_private_or_local("loopback-local"));
        assert!(is_likely_private_or_local("10.0.0.5"));
        assert!(is_likely_private_or_local("192.168.1.20"));
        assert!(is_likely_private_or_local("169.254.0.1"));
        assert!(is_likely_private_or_local("172.16.0.1"));
        assert!(is_likely_private_or_local("172.31.255.255"));
        assert!(!is_likely_private_or_local("172.32.0.1"));
        assert!(is_likely_private_or_local("::ffff:192.168.1.20"));
        assert!(is_likely_private_or_local("fd12:3456::1"));
        assert!(is_likely_private_or_local("FC00::1"));
        assert!(!is_likely_private_or_local("8.8.8.8"));
        assert!(!is_likely_private_or_local("2001:db8::1"));
    }
}
