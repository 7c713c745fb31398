#[cfg(test)]
mod tests;

pub mod callback;
pub mod context;
pub mod error;
pub mod handles;
pub mod interfaces;
pub mod runtime;
pub mod service;
pub mod stream;
pub mod types;

// JNI bridge for Android and desktop JVMs
#[cfg(feature = "jni-bridge")]
pub mod jni_bridge;

pub use callback::Callback;
pub use context::Context;
pub use error::{Error, Exception, Result, VError};
pub use handles::{Handle, HandleRegistry, Pinned};
pub use service::Bridge;
pub use stream::{ChannelIterator, StreamState};
pub use types::{BridgeConfig, Payload};
