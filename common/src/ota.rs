use log::{error, info};

use crate::{error::OtaError, ports::OtaHandler};

/// Reports OTA lifecycle events through the log facade.
///
/// Progress is logged in 10% steps; transports that cannot report a total size
/// log every 64 KiB instead.
#[derive(Debug, Default)]
pub struct LoggingOtaHandler {
    last_logged_step: Option<u64>,
}

const UNKNOWN_TOTAL_STEP_BYTES: u64 = 64 * 1024;

impl LoggingOtaHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn step(written: u64, total: Option<u64>) -> u64 {
        match total {
            Some(total) if total > 0 => written.saturating_mul(10) / total,
            _ => written / UNKNOWN_TOTAL_STEP_BYTES,
        }
    }
}

impl OtaHandler for LoggingOtaHandler {
    fn on_start(&mut self) {
        self.last_logged_step = None;
        info!("ota update starting");
    }

    fn on_progress(&mut self, written: u64, total: Option<u64>) {
        let step = Self::step(written, total);
        if self.last_logged_step == Some(step) {
            return;
        }
        self.last_logged_step = Some(step);

        match total {
            Some(total) if total > 0 => {
                info!("ota progress: {}% ({written}/{total} bytes)", written * 100 / total)
            }
            _ => info!("ota progress: {written} bytes"),
        }
    }

    fn on_end(&mut self) {
        info!("ota update complete");
    }

    fn on_error(&mut self, error: &OtaError) {
        let category = match error {
            OtaError::Auth => "auth",
            OtaError::Begin(_) => "begin",
            OtaError::Connect(_) => "connect",
            OtaError::Receive(_) => "receive",
            OtaError::End(_) => "end",
        };
        error!("ota {category} error: {error}");
    }
}
