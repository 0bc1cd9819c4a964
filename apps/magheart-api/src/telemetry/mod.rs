pub mod channel;

pub use channel::{Subscription, TelemetryChannel, TelemetryEvent};
