//! ERP integration events: topics, envelopes, schemas and the bus abstraction.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod schema;
pub mod topic;

pub use bus::{BusError, MessageSource, RawMessage};
pub use envelope::Envelope;
pub use in_memory_bus::{InMemoryBus, InMemoryMessageSource};
pub use schema::{
    EventSchema, InboundEvent, PriceUpdateEvent, ProductRef, ProductUpdateEvent, StockUpdateEvent,
};
pub use topic::{Topic, UnknownTopic};
