//! Broker client implementations

pub mod in_memory;
pub mod rest;

pub use in_memory::{InMemoryBroker, InMemoryProcessor};
pub use rest::{ConnectionString, RestBrokerClient, RestProcessor, SasTokenProvider};
