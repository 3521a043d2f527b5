//! Event processing: wraps the processor chain with before/after logging
//! through the shared logger.

use std::sync::Arc;

use crate::{
    event::Event,
    logger::EventLogger,
    processor::{Processor, chain},
};

pub struct EventProcessor {
    processors: Vec<Processor>,
    logger: Arc<EventLogger>,
}

impl EventProcessor {
    pub fn new(processors: Vec<Processor>, logger: Arc<EventLogger>) -> Self {
        Self { processors, logger }
    }

    /// Logs the event, runs the chain if there is anything for it to do,
    /// then logs again so the log captures both the raw and the processed
    /// shape of every event.
    pub async fn process(&self, event: &mut Event) {
        self.logger.log(event).await;

        let has_enabled_processor = self.processors.iter().any(|p| p.enabled);
        if has_enabled_processor && !event.payload.is_null() {
            chain::run_chain(&self.processors, event).await;
        }

        self.logger.log(event).await;
    }
}
