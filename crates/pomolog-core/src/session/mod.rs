mod model;
mod store;

pub use model::{engine_id, engine_seq, manual_id, Session, SessionState, MANUAL_ID_PREFIX};
pub use store::SessionStore;
