//! Inbound command handling
//!
//! [`CommandDispatcher`] validates and executes commands against an
//! [`ActionExecutor`](crate::gpio::ActionExecutor); replies leave through a
//! [`ReplySink`], normally a [`BusReplySink`] over the connection manager.

pub mod dispatcher;
pub mod reply;

pub use dispatcher::{CommandDispatcher, DispatchOutcome, SwitchCommand, SwitchError};
pub use reply::{BusReplySink, ReplySink};
