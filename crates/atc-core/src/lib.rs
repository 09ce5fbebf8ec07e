pub mod model;
pub mod store;

pub use model::{Clearance, Frequency, StreamLifecycle, SttSession, TranscriptionRecord};
pub use store::{ClearanceStore, Store, StoreError, TranscriptionStore};
