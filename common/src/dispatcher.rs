use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::MIN_PUBLISH_INTERVAL_MS, error::CommandError, state::DeviceState,
};

pub const MAX_COMMAND_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PublishTelemetry,
    ChangeTelemetryInterval(u64),
    PublishStats,
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    command: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

pub fn decode(payload: &[u8]) -> Result<Command, CommandError> {
    if payload.len() > MAX_COMMAND_BYTES {
        return Err(CommandError::Oversized(payload.len()));
    }

    let envelope: CommandEnvelope = serde_json::from_slice(payload)?;
    let command = envelope.command.ok_or(CommandError::MissingCommand)?;

    match command.as_str() {
        "publishTelemetry" => Ok(Command::PublishTelemetry),
        "publishStats" | "publishStatus" => Ok(Command::PublishStats),
        "changeTelemetryInterval" => envelope
            .value
            .as_ref()
            .and_then(Value::as_u64)
            .map(Command::ChangeTelemetryInterval)
            .ok_or(CommandError::MissingValue {
                command: "changeTelemetryInterval",
            }),
        _ => Ok(Command::Unknown(command)),
    }
}

/// Apply a new publish interval. Values at or below the floor are ignored so
/// a value sent in seconds cannot flood the broker.
pub fn change_publish_interval(state: &mut DeviceState, interval_ms: u64) -> bool {
    if interval_ms <= MIN_PUBLISH_INTERVAL_MS {
        warn!(
            "ignoring publish interval {interval_ms} ms: must exceed {MIN_PUBLISH_INTERVAL_MS} ms"
        );
        return false;
    }

    state.publish_interval_ms = interval_ms;
    state.last_publish_ms = None;
    info!("publish interval changed to {interval_ms} ms");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_known_commands() {
        assert_eq!(
            decode(br#"{"command":"publishTelemetry"}"#).unwrap(),
            Command::PublishTelemetry
        );
        assert_eq!(
            decode(br#"{"command":"publishStatus"}"#).unwrap(),
            Command::PublishStats
        );
        assert_eq!(
            decode(br#"{"command":"publishStats"}"#).unwrap(),
            Command::PublishStats
        );
        assert_eq!(
            decode(br#"{"command":"changeTelemetryInterval","value":15000}"#).unwrap(),
            Command::ChangeTelemetryInterval(15_000)
        );
    }

    #[test]
    fn unknown_command_is_preserved_for_logging() {
        assert_eq!(
            decode(br#"{"command":"selfDestruct","value":1}"#).unwrap(),
            Command::Unknown("selfDestruct".to_string())
        );
    }

    #[test]
    fn missing_command_is_distinct_from_unknown() {
        assert!(matches!(
            decode(br#"{"value":5000}"#),
            Err(CommandError::MissingCommand)
        ));
        assert!(matches!(
            decode(br#"{"command":null}"#),
            Err(CommandError::MissingCommand)
        ));
    }

    #[test]
    fn interval_without_numeric_value_is_rejected() {
        assert!(matches!(
            decode(br#"{"command":"changeTelemetryInterval"}"#),
            Err(CommandError::MissingValue { .. })
        ));
        assert!(matches!(
            decode(br#"{"command":"changeTelemetryInterval","value":"soon"}"#),
            Err(CommandError::MissingValue { .. })
        ));
        assert!(matches!(
            decode(br#"{"command":"changeTelemetryInterval","value":-5000}"#),
            Err(CommandError::MissingValue { .. })
        ));
    }

    #[test]
    fn garbage_and_oversized_payloads_are_rejected() {
        assert!(matches!(decode(b"not json"), Err(CommandError::Malformed(_))));
        assert!(matches!(decode(b"[1,2]"), Err(CommandError::Malformed(_))));

        let big = vec![b' '; MAX_COMMAND_BYTES + 1];
        assert!(matches!(decode(&big), Err(CommandError::Oversized(513))));
    }

    #[test]
    fn interval_floor_is_exclusive() {
        let mut state = DeviceState::new(&NodeConfig::default());
        state.last_publish_ms = Some(1_234);

        assert!(!change_publish_interval(&mut state, 3_999));
        assert!(!change_publish_interval(&mut state, 4_000));
        assert_eq!(state.publish_interval_ms, 60_000);
        assert_eq!(state.last_publish_ms, Some(1_234));

        assert!(change_publish_interval(&mut state, 4_001));
        assert_eq!(state.publish_interval_ms, 4_001);
        assert_eq!(state.last_publish_ms, None);
    }
}
