pub mod tracing;

pub use self::tracing::{RequestId, request_id_middleware};
