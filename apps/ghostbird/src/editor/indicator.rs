use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::runner::api::{IndicatorError, StatusIndicator};
use crate::session::ClientStatus;

/// Reports status changes to the log. Used by hosts without a visual indicator.
pub struct LogIndicator {
    document: String,
    last: Mutex<Option<ClientStatus>>,
}

impl LogIndicator {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            last: Mutex::new(None),
        }
    }

    pub fn last(&self) -> Option<ClientStatus> {
        *self.last.lock()
    }
}

#[async_trait]
impl StatusIndicator for LogIndicator {
    async fn update(&self, status: ClientStatus) -> Result<(), IndicatorError> {
        let previous = self.last.lock().replace(status);
        if previous != Some(status) {
            info!(document = %self.document, ?status, "sync status changed");
        }
        Ok(())
    }
}
