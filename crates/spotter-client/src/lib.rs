//! # spotter-client
//!
//! Message synchronization and delivery-state engine for the trainer console.
//!
//! The UI layer talks to a running engine through [`EngineHandle`]; the
//! engine owns all chat state in a single task, persists through a
//! [`ChatApi`](spotter_net::ChatApi) collaborator and replays its offline
//! queue whenever connectivity comes back.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use engine::{EngineBuilder, EngineCommand, EngineHandle};
pub use error::{EngineError, PersistenceFailure};
pub use events::{ChannelNotifier, EngineEvent, LogNotifier, Notification, Notifier};
pub use state::ChatState;

/// Install the global tracing subscriber.  `RUST_LOG` overrides the default
/// filter.  Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("spotter_client=debug,spotter_net=debug,spotter_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
