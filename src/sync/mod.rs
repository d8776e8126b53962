//! Revalidation triggers
//!
//! Interval polling plus focus and reconnect signals, driving
//! [`revalidate_active`](crate::cache::KeyedAsyncCache::revalidate_active) on
//! every registered cache.

mod driver;

pub use driver::{
    DriverCommand, DriverEvent, DriverHandle, Revalidatable, RevalidationDriver, Trigger,
    TriggerConfig, EVENT_CHANNEL_CAPACITY,
};
