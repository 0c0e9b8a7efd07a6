use crate::coordinator::CoordinatorMsg;
use crate::request::channel::mailbox;
use crate::request::Mailbox;
use crate::storage::{Key, Value};
use crate::txn::ClientId;
use crate::util::{ProtocolError, RequestError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// What a client asks of its coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Begin { client: ClientId },
    Read { client: ClientId, key: Key },
    Write { client: ClientId, key: Key, value: Value },
    End { client: ClientId, commit: bool },
}

/// What a coordinator tells a client. A duplicate begin gets no reply at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientReply {
    Accepted,
    ReadResult { key: Key, value: Value },
    TxnResult { committed: bool },
}

#[async_trait]
pub trait Client: Send {
    async fn begin(&mut self) -> Result<()>;
    async fn read(&mut self, key: Key) -> Result<Value>;
    /// Not acknowledged until the transaction ends.
    fn write(&mut self, key: Key, value: Value) -> Result<()>;
    /// Returns whether the transaction committed.
    async fn end(&mut self, commit: bool) -> Result<bool>;
}

/// A client driving one transaction at a time and waiting for each reply
/// it is owed.
pub struct InteractiveTxnClient {
    id: ClientId,
    coordinator: Mailbox<CoordinatorMsg>,
    replies: UnboundedReceiver<ClientReply>,
}

impl InteractiveTxnClient {
    /// Returns the client and the mailbox its coordinator must reply to.
    pub fn new(id: ClientId, coordinator: Mailbox<CoordinatorMsg>) -> (Self, Mailbox<ClientReply>) {
        let (reply_to, replies) = mailbox();
        let client = Self {
            id,
            coordinator,
            replies,
        };
        (client, reply_to)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    fn request(&self, req: ClientRequest) -> Result<()> {
        self.coordinator.send(CoordinatorMsg::Client(req))
    }

    async fn next_reply(&mut self, wanted: &'static str) -> Result<ClientReply> {
        self.replies
            .recv()
            .await
            .ok_or_else(|| RequestError::ReplyDropped(wanted).into())
    }
}

#[async_trait]
impl Client for InteractiveTxnClient {
    async fn begin(&mut self) -> Result<()> {
        self.request(ClientRequest::Begin { client: self.id })?;
        match self.next_reply("accept").await? {
            ClientReply::Accepted => Ok(()),
            _ => Err(ProtocolError::UnexpectedReply("accept").into()),
        }
    }

    async fn read(&mut self, key: Key) -> Result<Value> {
        self.request(ClientRequest::Read {
            client: self.id,
            key,
        })?;
        match self.next_reply("read result").await? {
            ClientReply::ReadResult { key: k, value } if k == key => Ok(value),
            _ => Err(ProtocolError::UnexpectedReply("read result").into()),
        }
    }

    fn write(&mut self, key: Key, value: Value) -> Result<()> {
        self.request(ClientRequest::Write {
            client: self.id,
            key,
            value,
        })
    }

    async fn end(&mut self, commit: bool) -> Result<bool> {
        self.request(ClientRequest::End {
            client: self.id,
            commit,
        })?;
        match self.next_reply("txn result").await? {
            ClientReply::TxnResult { committed } => Ok(committed),
            _ => Err(ProtocolError::UnexpectedReply("txn result").into()),
        }
    }
}
