//! DualRPC — bidirectional RPC over a single stream connection.
//!
//! Both ends of a connection may call methods on objects the other end has
//! exposed. Objects passed as arguments or results travel by reference, so a
//! call can hand the peer a callback that the peer invokes before answering.
//!
//! ## Architecture
//!
//! - **Variant**: self-describing value type and its binary encoding
//! - **ObjectRegistry**: per-session table of exposed local objects
//! - **FrameTransport**: `ROC1` handshake and length-prefixed frames
//! - **RemoteRef**: handle to an object living on the peer
//! - **Session**: request correlation and the reentrant dispatch loop
//! - **RpcServer**: TCP listener running one session per connection

pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod remote;
pub mod server;
pub mod session;
pub mod sessions;
pub mod transport;
pub mod variant;

/// Index of an object in a session's registry.
pub type ObjectId = u32;
/// Correlates a RETURN with its CALL_FUNC.
pub type RequestId = u32;
/// Identifier assigned during the handshake.
pub type SessionId = u64;

pub use config::{ServerConfig, SessionConfig};
pub use error::{WireError, WireResult};
pub use message::{CallMessage, MessageType, ReturnMessage, WireMessage};
pub use registry::{Args, ExposedObject, LocalObject, ObjectHandle, ObjectRegistry, ROOT_OBJECT_ID};
pub use remote::{RemoteMethod, RemoteRef};
pub use server::{connect, RpcServer};
pub use session::{CallState, Session};
pub use sessions::{SessionEntry, SessionTable};
pub use transport::{FrameTransport, DEFAULT_MAX_FRAME_SIZE, PROTOCOL_TAG};
pub use variant::{Variant, VariantKind, VariantMap};
