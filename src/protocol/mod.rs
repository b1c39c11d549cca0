//! Wire types and subject conventions for the starter bus protocol
//!
//! Inbound commands arrive as `{"body": "<command>"}` on dot-delimited
//! subjects whose third segment is the routing key. Outbound traffic uses
//! two flat envelope shapes: replies (`body`, `subject`, `source`) and
//! trigger events (`body`, `sender`).

pub mod messages;
pub mod subjects;

pub use messages::*;
pub use subjects::*;
