//! Push-notification bridge and local notification cache.
//!
//! A parallel, job-independent channel next to the realtime multiplexer:
//! the [`NotificationBridge`] receives out-of-band provider pushes,
//! records each one in the bounded, persisted [`NotificationCache`], and
//! republishes foreground deliveries on the in-process [`AlertBus`] so
//! any number of consumers can observe the same alert surface.

pub mod bridge;
pub mod bus;
pub mod cache;
pub mod record;
pub mod store;

pub use bridge::{
    DeliveryPath, LogNotifier, NotificationBridge, Permission, ProviderPush, SystemNotifier,
};
pub use bus::AlertBus;
pub use cache::{NotificationCache, DEFAULT_CAPACITY};
pub use record::NotificationRecord;
pub use store::{FileStore, NotificationStore, StoreError};
