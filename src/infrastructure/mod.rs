pub mod event_bus;
pub mod logging;
pub mod storage;

pub use event_bus::{
    ProviderEvent, ProviderEventBus, ProviderEventEnvelope, ProviderEventSender, StateChange,
    StateNotifier,
};
pub use storage::{FileStorage, InMemoryStorage, PersistedState, StorageBackend};
