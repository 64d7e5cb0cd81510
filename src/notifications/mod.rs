pub mod hub;

pub use hub::{NotificationHub, Subscription};
