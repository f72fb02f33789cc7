pub mod cache;
pub mod envelope;
pub mod methods;

pub use cache::ReplayCache;
pub use envelope::{decode, encode, read_envelope, try_decode_buffered, write_envelope, CallId, Envelope, EnvelopeError};
pub use methods::{AdminOp, EdgeId, EdgeInfo, EdgeNotification, EdgeStats, EdgeStatus, HubNotification, RpcError, RpcRequest, RpcResponse};
