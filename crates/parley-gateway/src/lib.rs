pub mod broker;
pub mod connection;
pub mod dispatcher;
pub mod nats;

pub use broker::{Broker, BrokerKind, PublishError};
pub use dispatcher::{Delivery, Dispatcher, Scope};
