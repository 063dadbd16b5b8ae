use log::{info, warn};

use crate::{
    config::{NodeConfig, TopicConfig},
    ports::MqttPort,
    state::DeviceState,
    types::{StatsPayload, TelemetryField, TelemetryPayload},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub aggregate: bool,
    pub fields_published: usize,
    pub fields_failed: usize,
}

pub fn telemetry_payload(state: &DeviceState, config: &NodeConfig) -> TelemetryPayload {
    let reading = &state.last_reading;
    TelemetryPayload {
        sketch: config.sketch_name.clone(),
        mac: state.mac_address.clone(),
        ip: state.ip_address.clone(),
        rssi: reading.rssi,
        notes: config.notes.clone(),
        temp_c: reading.temp_c,
        temp_f: reading.temp_f,
        humidity: reading.humidity,
        publish_count: state.publish_count,
    }
}

pub fn stats_payload(state: &DeviceState, config: &NodeConfig) -> StatsPayload {
    StatsPayload {
        sketch: config.sketch_name.clone(),
        mac: state.mac_address.clone(),
        ip: state.ip_address.clone(),
        rssi: state.last_reading.rssi,
        notes: config.notes.clone(),
        publish_count: state.publish_count,
    }
}

pub fn field_topic(topics: &TopicConfig, field: TelemetryField) -> &str {
    match field {
        TelemetryField::Sketch => &topics.sketch,
        TelemetryField::Mac => &topics.mac,
        TelemetryField::Ip => &topics.ip,
        TelemetryField::Rssi => &topics.rssi,
        TelemetryField::PublishCount => &topics.publish_count,
        TelemetryField::Notes => &topics.notes,
        TelemetryField::TempC => &topics.temp_c,
        TelemetryField::TempF => &topics.temp_f,
        TelemetryField::Humidity => &topics.humidity,
    }
}

/// Publish the aggregate telemetry document, then every field on its own
/// topic. Failures are logged; the next scheduled publish is the retry.
pub fn publish_telemetry<M: MqttPort>(
    state: &mut DeviceState,
    config: &NodeConfig,
    mqtt: &mut M,
    now_ms: u64,
) -> PublishReport {
    state.publish_count = state.publish_count.saturating_add(1);
    state.last_publish_ms = Some(now_ms);

    let payload = telemetry_payload(state, config);
    let mut report = PublishReport::default();

    match serde_json::to_vec(&payload) {
        Ok(body) => match mqtt.publish(&config.topics.telemetry, &body) {
            Ok(()) => {
                report.aggregate = true;
                info!(
                    "published telemetry #{} to `{}`",
                    payload.publish_count, config.topics.telemetry
                );
            }
            Err(err) => warn!(
                "telemetry publish to `{}` failed: {err}",
                config.topics.telemetry
            ),
        },
        Err(err) => warn!("telemetry serialization failed: {err}"),
    }

    for (field, value) in payload.fields() {
        let topic = field_topic(&config.topics, field);
        match mqtt.publish(topic, value.as_bytes()) {
            Ok(()) => report.fields_published += 1,
            Err(err) => {
                report.fields_failed += 1;
                warn!("failed to publish {} to `{topic}`: {err}", field.as_str());
            }
        }
    }

    report
}

pub fn publish_stats<M: MqttPort>(
    state: &mut DeviceState,
    config: &NodeConfig,
    mqtt: &mut M,
) -> bool {
    state.publish_count = state.publish_count.saturating_add(1);

    let payload = stats_payload(state, config);
    let body = match serde_json::to_vec(&payload) {
        Ok(body) => body,
        Err(err) => {
            warn!("stats serialization failed: {err}");
            return false;
        }
    };

    match mqtt.publish(&config.topics.stats, &body) {
        Ok(()) => {
            info!("published stats to `{}`", config.topics.stats);
            true
        }
        Err(err) => {
            warn!("stats publish to `{}` failed: {err}", config.topics.stats);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mock::MockMqtt, types::Reading};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn connected_rig() -> (DeviceState, NodeConfig, MockMqtt) {
        let config = NodeConfig::default();
        let mut state = DeviceState::new(&config);
        state.mac_address = "AA:BB:CC:DD:EE:FF".to_string();
        state.ip_address = "192.168.1.50".to_string();
        state.last_reading = Reading {
            temp_c: 21.5,
            temp_f: 70.7,
            humidity: 48.25,
            rssi: -63,
        };
        let mut mqtt = MockMqtt::new();
        mqtt.connected = true;
        (state, config, mqtt)
    }

    #[test]
    fn aggregate_document_has_fixed_schema() {
        let (mut state, config, mut mqtt) = connected_rig();

        let report = publish_telemetry(&mut state, &config, &mut mqtt, 9_000);

        assert_eq!(
            report,
            PublishReport {
                aggregate: true,
                fields_published: 9,
                fields_failed: 0
            }
        );
        let body: Value = serde_json::from_str(&mqtt.published_on("espWeather")[0]).unwrap();
        assert_eq!(
            body,
            json!({
                "sketch": "weather-sensor",
                "mac": "AA:BB:CC:DD:EE:FF",
                "ip": "192.168.1.50",
                "rssi": -63,
                "notes": "ESP32 with HTU21D and OTA",
                "tempC": 21.5,
                "tempF": 70.7,
                "humidity": 48.25,
                "publishCount": 1
            })
        );
        assert_eq!(state.last_publish_ms, Some(9_000));
    }

    #[test]
    fn per_field_topics_carry_fixed_precision_text() {
        let (mut state, config, mut mqtt) = connected_rig();
        publish_telemetry(&mut state, &config, &mut mqtt, 1);

        assert_eq!(mqtt.published_on(&config.topics.temp_c), vec!["21.50"]);
        assert_eq!(mqtt.published_on(&config.topics.temp_f), vec!["70.70"]);
        assert_eq!(mqtt.published_on(&config.topics.humidity), vec!["48.25"]);
        assert_eq!(mqtt.published_on(&config.topics.rssi), vec!["-63"]);
        assert_eq!(mqtt.published_on(&config.topics.publish_count), vec!["1"]);
        assert_eq!(mqtt.published_on(&config.topics.sketch), vec!["weather-sensor"]);
    }

    #[test]
    fn one_failing_field_does_not_stop_the_rest() {
        let (mut state, config, mut mqtt) = connected_rig();
        mqtt.failing_topics = vec![config.topics.ip.clone(), config.topics.telemetry.clone()];

        let report = publish_telemetry(&mut state, &config, &mut mqtt, 1);

        assert!(!report.aggregate);
        assert_eq!(report.fields_published, 8);
        assert_eq!(report.fields_failed, 1);
        assert_eq!(mqtt.published_on(&config.topics.humidity), vec!["48.25"]);
        assert_eq!(state.publish_count, 1);
    }

    #[test]
    fn stats_omit_sensor_values() {
        let (mut state, config, mut mqtt) = connected_rig();
        state.publish_count = 41;

        assert!(publish_stats(&mut state, &config, &mut mqtt));

        let body: Value = serde_json::from_str(&mqtt.published_on("espStats")[0]).unwrap();
        assert_eq!(
            body,
            json!({
                "sketch": "weather-sensor",
                "mac": "AA:BB:CC:DD:EE:FF",
                "ip": "192.168.1.50",
                "rssi": -63,
                "notes": "ESP32 with HTU21D and OTA",
                "publishCount": 42
            })
        );
        assert_eq!(state.last_publish_ms, None);
    }

    #[test]
    fn disconnected_publish_is_observed_not_raised() {
        let (mut state, config, mut mqtt) = connected_rig();
        mqtt.connected = false;

        assert!(!publish_stats(&mut state, &config, &mut mqtt));
        let report = publish_telemetry(&mut state, &config, &mut mqtt, 5);
        assert_eq!(report.fields_failed, 9);
        assert!(mqtt.published.is_empty());
    }
}
