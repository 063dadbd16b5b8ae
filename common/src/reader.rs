use log::{info, warn};

use crate::{
    config::SensorLimits,
    error::{Channel, FatalError},
    ports::SensorPort,
    state::DeviceState,
    types::{celsius_to_fahrenheit, Sample},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub temp_accepted: bool,
    pub humidity_accepted: bool,
}

/// Poll the sensor once and fold the result into `state`.
///
/// Rejected channels keep their previous value in `last_reading`. Returns
/// `FatalError::SensorInvalid` once either channel has been rejected more than
/// `limits.max_consecutive_bad` times in a row.
pub fn read_telemetry<S: SensorPort>(
    state: &mut DeviceState,
    limits: &SensorLimits,
    sensor: &mut S,
    rssi: i32,
) -> Result<ReadOutcome, FatalError> {
    state.last_reading.rssi = rssi;

    let outcome = match sensor.read() {
        Ok(sample) => apply_sample(state, limits, sample),
        Err(err) => {
            warn!("sensor read failed: {err}");
            state.consecutive_bad_temp = state.consecutive_bad_temp.saturating_add(1);
            state.consecutive_bad_humidity = state.consecutive_bad_humidity.saturating_add(1);
            ReadOutcome {
                temp_accepted: false,
                humidity_accepted: false,
            }
        }
    };

    check_consecutive_failures(state, limits)?;

    let reading = &state.last_reading;
    info!(
        "telemetry: {:.2}C / {:.2}F, {:.2}% RH, rssi {} dBm",
        reading.temp_c, reading.temp_f, reading.humidity, reading.rssi
    );

    Ok(outcome)
}

pub fn apply_sample(state: &mut DeviceState, limits: &SensorLimits, sample: Sample) -> ReadOutcome {
    let temp_accepted = limits.temp_valid(sample.temp_c);
    if temp_accepted {
        state.last_reading.temp_c = sample.temp_c;
        state.last_reading.temp_f = celsius_to_fahrenheit(sample.temp_c);
        state.consecutive_bad_temp = 0;
    } else {
        state.consecutive_bad_temp = state.consecutive_bad_temp.saturating_add(1);
        warn!(
            "rejected temperature {:.2}C ({} consecutive)",
            sample.temp_c, state.consecutive_bad_temp
        );
    }

    let humidity_accepted = limits.humidity_valid(sample.humidity);
    if humidity_accepted {
        state.last_reading.humidity = sample.humidity;
        state.consecutive_bad_humidity = 0;
    } else {
        state.consecutive_bad_humidity = state.consecutive_bad_humidity.saturating_add(1);
        warn!(
            "rejected humidity {:.2}% ({} consecutive)",
            sample.humidity, state.consecutive_bad_humidity
        );
    }

    ReadOutcome {
        temp_accepted,
        humidity_accepted,
    }
}

fn check_consecutive_failures(
    state: &DeviceState,
    limits: &SensorLimits,
) -> Result<(), FatalError> {
    if state.consecutive_bad_temp > limits.max_consecutive_bad {
        return Err(FatalError::SensorInvalid {
            channel: Channel::Temperature,
            consecutive: state.consecutive_bad_temp,
        });
    }
    if state.consecutive_bad_humidity > limits.max_consecutive_bad {
        return Err(FatalError::SensorInvalid {
            channel: Channel::Humidity,
            consecutive: state.consecutive_bad_humidity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::NodeConfig, error::SensorError, mock::MockSensor};
    use pretty_assertions::assert_eq;

    fn sample(temp_c: f32, humidity: f32) -> Sample {
        Sample { temp_c, humidity }
    }

    fn fresh_state() -> (DeviceState, SensorLimits) {
        let config = NodeConfig::default();
        (DeviceState::new(&config), config.sensor)
    }

    #[test]
    fn valid_sample_updates_reading_and_fahrenheit() {
        let (mut state, limits) = fresh_state();
        let mut sensor = MockSensor::new([Ok(sample(25.0, 40.0))]);

        let outcome = read_telemetry(&mut state, &limits, &mut sensor, -61).unwrap();

        assert!(outcome.temp_accepted && outcome.humidity_accepted);
        assert_eq!(state.last_reading.temp_c, 25.0);
        assert_eq!(state.last_reading.temp_f, 77.0);
        assert_eq!(state.last_reading.humidity, 40.0);
        assert_eq!(state.last_reading.rssi, -61);
    }

    #[test]
    fn channels_count_independently() {
        let (mut state, limits) = fresh_state();

        apply_sample(&mut state, &limits, sample(120.0, 50.0));
        apply_sample(&mut state, &limits, sample(120.0, 50.0));
        assert_eq!(state.consecutive_bad_temp, 2);
        assert_eq!(state.consecutive_bad_humidity, 0);

        apply_sample(&mut state, &limits, sample(21.0, 140.0));
        assert_eq!(state.consecutive_bad_temp, 0);
        assert_eq!(state.consecutive_bad_humidity, 1);

        apply_sample(&mut state, &limits, sample(-45.0, 140.0));
        assert_eq!(state.consecutive_bad_temp, 1);
        assert_eq!(state.consecutive_bad_humidity, 2);

        apply_sample(&mut state, &limits, sample(-45.0, 55.0));
        assert_eq!(state.consecutive_bad_temp, 2);
        assert_eq!(state.consecutive_bad_humidity, 0);
    }

    #[test]
    fn rejected_values_keep_last_known_good() {
        let (mut state, limits) = fresh_state();
        apply_sample(&mut state, &limits, sample(19.5, 45.0));
        apply_sample(&mut state, &limits, sample(200.0, -3.0));

        assert_eq!(state.last_reading.temp_c, 19.5);
        assert_eq!(state.last_reading.humidity, 45.0);
    }

    #[test]
    fn five_failures_are_tolerated_six_are_fatal() {
        let (mut state, limits) = fresh_state();
        let mut sensor = MockSensor::new((0..6).map(|_| Ok(sample(20.0, 101.0))));

        for _ in 0..5 {
            assert!(read_telemetry(&mut state, &limits, &mut sensor, -50).is_ok());
        }
        assert_eq!(state.consecutive_bad_humidity, 5);

        let err = read_telemetry(&mut state, &limits, &mut sensor, -50).unwrap_err();
        assert_eq!(
            err,
            FatalError::SensorInvalid {
                channel: Channel::Humidity,
                consecutive: 6
            }
        );
    }

    #[test]
    fn bus_error_counts_against_both_channels() {
        let (mut state, limits) = fresh_state();
        let mut sensor = MockSensor::new([Err(SensorError::NotResponding)]);

        let outcome = read_telemetry(&mut state, &limits, &mut sensor, -50).unwrap();

        assert!(!outcome.temp_accepted && !outcome.humidity_accepted);
        assert_eq!(state.consecutive_bad_temp, 1);
        assert_eq!(state.consecutive_bad_humidity, 1);
    }

    #[test]
    fn nan_is_rejected() {
        let (mut state, limits) = fresh_state();
        let outcome = apply_sample(&mut state, &limits, sample(f32::NAN, f32::NAN));
        assert_eq!(
            outcome,
            ReadOutcome {
                temp_accepted: false,
                humidity_accepted: false
            }
        );
    }
}
