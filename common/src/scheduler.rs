use crate::types::IndicatorMode;

/// Whether a periodic task whose last run was at `last_ms` should fire now.
///
/// `None` means the task has never fired and is always due. The comparison
/// never subtracts past zero, so during the first `interval_ms` after boot a
/// task that has already fired is not reported as overdue.
pub fn is_due(now_ms: u64, interval_ms: u64, last_ms: Option<u64>) -> bool {
    match last_ms {
        None => true,
        Some(last_ms) => now_ms > interval_ms && now_ms - interval_ms > last_ms,
    }
}

pub fn indicator_mode(wifi_associated: bool, mqtt_connected: bool) -> IndicatorMode {
    match (wifi_associated, mqtt_connected) {
        (true, true) => IndicatorMode::SteadyOn,
        (true, false) => IndicatorMode::Toggle,
        (false, _) => IndicatorMode::SteadyOff,
    }
}

/// Next LED level given the current one.
pub fn next_indicator_level(mode: IndicatorMode, lit: bool) -> bool {
    match mode {
        IndicatorMode::SteadyOn => true,
        IndicatorMode::Toggle => !lit,
        IndicatorMode::SteadyOff => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_fired_is_always_due() {
        assert!(is_due(0, 1_000, None));
        assert!(is_due(500, 1_000, None));
        assert!(is_due(u64::MAX, 1_000, None));
    }

    #[test]
    fn early_boot_does_not_wrap() {
        assert!(!is_due(500, 1_000, Some(400)));
        assert!(!is_due(999, 1_000, Some(0)));
        assert!(!is_due(1_000, 1_000, Some(0)));
    }

    #[test]
    fn due_strictly_after_interval() {
        assert!(!is_due(11_000, 10_000, Some(1_000)));
        assert!(is_due(11_001, 10_000, Some(1_000)));
    }

    #[test]
    fn indicator_follows_connectivity() {
        assert_eq!(indicator_mode(true, true), IndicatorMode::SteadyOn);
        assert_eq!(indicator_mode(true, false), IndicatorMode::Toggle);
        assert_eq!(indicator_mode(false, true), IndicatorMode::SteadyOff);
        assert_eq!(indicator_mode(false, false), IndicatorMode::SteadyOff);
    }

    #[test]
    fn toggle_alternates_levels() {
        let mut lit = false;
        let mut levels = Vec::new();
        for _ in 0..4 {
            lit = next_indicator_level(IndicatorMode::Toggle, lit);
            levels.push(lit);
        }
        assert_eq!(levels, vec![true, false, true, false]);
        assert!(next_indicator_level(IndicatorMode::SteadyOn, false));
        assert!(!next_indicator_level(IndicatorMode::SteadyOff, true));
    }
}
