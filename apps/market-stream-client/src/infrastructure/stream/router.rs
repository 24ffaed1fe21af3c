//! Default response routing.

use std::sync::Arc;

use crate::application::ports::{EventSink, MappedPayload, PayloadMapper, ResponseRouter};
use crate::domain::streaming::{EventType, MarketDataResponse};

/// Mapper that produces no domain values.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPayloadMapper;

impl PayloadMapper for NoopPayloadMapper {
    fn map(&self, _event_type: EventType, _raw: &MarketDataResponse) -> Option<MappedPayload> {
        None
    }
}

/// Routes each response as one event of its own type, mapping the payload
/// only when a handler asked for it.
pub struct DefaultResponseRouter {
    mapper: Arc<dyn PayloadMapper>,
}

impl Default for DefaultResponseRouter {
    fn default() -> Self {
        Self::new(Arc::new(NoopPayloadMapper))
    }
}

impl DefaultResponseRouter {
    /// Create a router using `mapper` for mapped payloads.
    #[must_use]
    pub fn new(mapper: Arc<dyn PayloadMapper>) -> Self {
        Self { mapper }
    }
}

impl ResponseRouter for DefaultResponseRouter {
    fn route(&self, response: MarketDataResponse, sink: &dyn EventSink) {
        let event_type = response.event_type();
        let mapped = if sink.needs_mapped_payload(event_type) {
            self.mapper.map(event_type, &response)
        } else {
            None
        };
        sink.emit(event_type, Arc::new(response), mapped);
    }
}
