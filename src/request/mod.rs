use crate::util::{RequestError, Result};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

pub trait Request: Send + fmt::Debug {}

impl<T: Send + fmt::Debug> Request for T {}

/// The address of a node. Delivery is reliable and order-preserving while
/// the node runs, and sending never waits on the receiver.
pub struct Mailbox<M> {
    tx: UnboundedSender<M>,
}

impl<M> Mailbox<M> {
    pub fn new(tx: UnboundedSender<M>) -> Self {
        Self { tx }
    }

    pub fn send(&self, msg: M) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|e| RequestError::SendError(e.to_string()).into())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub mod channel;
