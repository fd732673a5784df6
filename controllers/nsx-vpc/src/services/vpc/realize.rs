//! Realization polling of NSX intent objects.

use crate::error::ControllerError;
use nsx_client::{NsxClientTrait, RealizationState};
use std::time::Duration;
use tracing::debug;

const DEFAULT_REALIZE_INTERVAL: Duration = Duration::from_secs(2);

/// Polling budget for realization checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealizeSettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl RealizeSettings {
    /// Poll every 2s until `timeout` has elapsed
    pub fn from_timeout(timeout: Duration) -> Self {
        let attempts = (timeout.as_millis() / DEFAULT_REALIZE_INTERVAL.as_millis()).max(1);
        Self {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            interval: DEFAULT_REALIZE_INTERVAL,
        }
    }

    /// No wait between polls (unit tests)
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            interval: Duration::ZERO,
        }
    }
}

impl Default for RealizeSettings {
    fn default() -> Self {
        Self::from_timeout(Duration::from_secs(300))
    }
}

/// Wait until every realized entity of `intent_path` is REALIZED.
///
/// An ERROR state fails immediately with the alarm messages. 404s and
/// retryable API errors count as "not realized yet".
pub async fn wait_for_realization(
    nsx: &dyn NsxClientTrait,
    intent_path: &str,
    settings: &RealizeSettings,
) -> Result<(), ControllerError> {
    let attempts = settings.attempts.max(1);
    for attempt in 1..=attempts {
        match nsx.get_realized_state(intent_path).await {
            Ok(entities) => {
                if let Some(failed) = entities.iter().find(|e| e.state == RealizationState::Error) {
                    let alarms: Vec<&str> = failed
                        .alarms
                        .iter()
                        .filter_map(|a| a.message.as_deref())
                        .collect();
                    let detail = if alarms.is_empty() {
                        format!("{} in state ERROR", failed.entity_type)
                    } else {
                        alarms.join("; ")
                    };
                    return Err(ControllerError::RealizationFailed {
                        path: intent_path.to_string(),
                        detail,
                    });
                }
                if !entities.is_empty() && entities.iter().all(|e| e.state == RealizationState::Realized) {
                    debug!("{} realized after {} attempt(s)", intent_path, attempt);
                    return Ok(());
                }
            }
            Err(e) if e.is_not_found() || e.is_retryable() => {
                debug!("Realization check of {} not ready: {}", intent_path, e);
            }
            Err(e) => return Err(e.into()),
        }
        if attempt < attempts && !settings.interval.is_zero() {
            tokio::time::sleep(settings.interval).await;
        }
    }

    Err(ControllerError::RealizationTimeout {
        path: intent_path.to_string(),
        attempts,
    })
}
