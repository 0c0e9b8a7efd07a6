use crate::request::Request;
use crate::util::Result;

/// An isolated owner of mutable state, reachable only through its mailbox.
///
/// `handle` runs to completion before the next message is taken, so
/// implementations never need interior locking.
pub trait Node: Send + 'static {
    type Msg: Request + 'static;

    fn name(&self) -> String;
    fn handle(&mut self, msg: Self::Msg) -> Result<()>;
}
