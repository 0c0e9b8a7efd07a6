use crate::txn::{ClientId, TxnId};
use std::result::Result as stdResult;
use thiserror::Error;

pub type Result<T> = stdResult<T, Error>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("request error {0}")]
    RequestError(RequestError),
    #[error("shard error {0}")]
    ShardError(ShardError),
    #[error("protocol error {0}")]
    ProtocolError(ProtocolError),
    #[error("config error {0}")]
    ConfigError(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShardError {
    #[error("shard size must be positive")]
    InvalidShardSize,
    #[error("no mailbox for partition {0}")]
    UnknownPartition(u32),
}

impl From<ShardError> for Error {
    fn from(e: ShardError) -> Error {
        Error::ShardError(e)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("channel send error {0}")]
    SendError(String),
    #[error("reply channel closed before {0} arrived")]
    ReplyDropped(&'static str),
    #[error("node task failed {0}")]
    JoinError(String),
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Error {
        Error::RequestError(e)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("coordinator {0} has not been welcomed yet")]
    NotBootstrapped(u32),
    #[error("client {0} has no active transaction")]
    NoActiveTxn(ClientId),
    #[error("client {0} is unknown to this coordinator")]
    UnknownClient(ClientId),
    #[error("{0} already ended")]
    AlreadyEnded(TxnId),
    #[error("workspace of {0} is frozen by a vote request")]
    WorkspaceFrozen(TxnId),
    #[error("write to key {0} carries no value")]
    MissingWriteValue(u64),
    #[error("read of key {0} came back unresolved")]
    UnresolvedRead(u64),
    #[error("unexpected reply, wanted {0}")]
    UnexpectedReply(&'static str),
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Error {
        Error::ProtocolError(e)
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Error {
        Error::ConfigError(e.to_string())
    }
}
