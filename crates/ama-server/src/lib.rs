pub mod config;
pub mod error;
pub mod handlers;
pub mod notifier;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::ApiError;
pub use notifier::{DeliveryReport, Notifier};
pub use registry::{ConnectionRegistry, DeliveryError, EventSink, Subscriber};
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::{SessionState, SubscriptionSession};

#[cfg(test)]
pub(crate) mod test_support;
