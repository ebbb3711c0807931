//! Real-time task update channel

pub mod channel;
pub mod frame;

pub use channel::{PushChannel, Subscription};
