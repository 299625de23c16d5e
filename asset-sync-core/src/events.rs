use tracing::{info, warn};

use crate::asset::ObjectMeta;
use crate::contract::{EventRecorder, Severity};

/// Emits resource events as log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, resource: &ObjectMeta, severity: Severity, reason: &str, message: &str) {
        match severity {
            Severity::Normal => info!(
                resource = %resource.key(),
                reason = %reason,
                event = %message,
                "Resource event"
            ),
            Severity::Warning => warn!(
                resource = %resource.key(),
                reason = %reason,
                event = %message,
                "Resource event"
            ),
        }
    }
}
