//! Client-side chat core for the Unimart marketplace.
//!
//! [`ChatAggregator`] merges the different chat sources into one list,
//! [`RealtimeChannel`] keeps one live subscription per open conversation and
//! [`ChatView`] ties a thread, its subscription and the typing debounce
//! together for one open chat.

pub mod aggregation;
pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod presence;
pub mod session;
pub mod thread;
pub mod transport;
pub mod typing;
pub mod view;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregation::{ChatAggregator, ChatSource, PresenceLookup};
pub use backend::{ChatBackend, HttpBackend};
pub use channel::{ChannelHandler, ConnectionState, RealtimeChannel, Subscription};
pub use config::ChannelConfig;
pub use error::ChatError;
pub use presence::PresenceTracker;
pub use session::SessionContext;
pub use thread::{ChatThread, LocalId, MessageKey, ThreadMessage};
pub use transport::{EventStream, RealtimeTransport, WsTransport};
pub use typing::TypingDebouncer;
pub use view::{ChatView, ViewState};
