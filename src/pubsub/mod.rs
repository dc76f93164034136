pub mod bus;

pub use bus::{BusError, InMemoryBus, PubSubBus, RedisBus};
