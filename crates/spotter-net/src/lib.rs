// Chat backend collaborator: REST client, in-process fake, connectivity probe.

pub mod api;
pub mod error;
pub mod fake;
pub mod health;
pub mod http;

pub use api::ChatApi;
pub use error::NetError;
pub use fake::FakeChatApi;
pub use health::{spawn_monitor, ConnectivityMonitor, ConnectivityTransition, HealthPolicy, MonitorHandle};
pub use http::HttpChatApi;
