//! warden-core: wire protocol shared by the warden server and client.
//!
//! The RPC surface is deliberately small: a request names an operation and
//! carries a JSON argument list, and the response is either a result value
//! or an error with a machine-matchable kind. Both are encoded as one JSON
//! object per line, and a connection carries exactly one exchange.
//!
//! Error kinds matter more than messages here: clients react differently to
//! an authentication rejection (re-enroll) than to a transport hiccup
//! (retry), so the kind must survive the wire intact.

pub mod protocol;

pub use protocol::{EnrollmentReply, ErrorKind, Request, Response, RpcError};
