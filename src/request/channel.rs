use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::node::Node;
use crate::request::Mailbox;
use crate::util::{RequestError, Result};

/// Creates the mailbox of a node that is not running yet, so that the node
/// can be handed its own address before it is spawned.
pub fn mailbox<M>() -> (Mailbox<M>, UnboundedReceiver<M>) {
    let (tx, rx) = unbounded_channel();
    (Mailbox::new(tx), rx)
}

/// Owner-side handle of a running node. Dropping it stops the node too.
pub struct NodeHandle<M> {
    mailbox: Mailbox<M>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<M> NodeHandle<M> {
    pub fn mailbox(&self) -> &Mailbox<M> {
        &self.mailbox
    }

    /// Stops the node after the message it is handling, queued messages are
    /// dropped.
    pub async fn stop(self) -> Result<()> {
        // the loop may already be gone if every sender was dropped
        let _ = self.stop.send(());
        self.task
            .await
            .map_err(|e| RequestError::JoinError(e.to_string()).into())
    }
}

/// Runs `node` on the current tokio runtime, feeding it from `inbox`.
pub fn spawn<N: Node>(
    node: N,
    mailbox: Mailbox<N::Msg>,
    inbox: UnboundedReceiver<N::Msg>,
) -> NodeHandle<N::Msg> {
    let (stop, stop_rx) = oneshot::channel();
    let task = tokio::spawn(collect_msgs(node, inbox, stop_rx));
    NodeHandle {
        mailbox,
        stop,
        task,
    }
}

async fn collect_msgs<N: Node>(
    mut node: N,
    mut inbox: UnboundedReceiver<N::Msg>,
    mut stop: oneshot::Receiver<()>,
) {
    let name = node.name();
    debug!(node = %name, "node started");
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            msg = inbox.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = node.handle(msg) {
                        warn!(node = %name, error = %e, "message rejected");
                    }
                }
                None => break,
            },
        }
    }
    debug!(node = %name, "node stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::run_in_tokio;
    use crate::util::ProtocolError;

    #[derive(Debug)]
    enum EchoMsg {
        Add(i32),
        Get(oneshot::Sender<i32>),
    }

    struct Sum {
        total: i32,
    }

    impl Node for Sum {
        type Msg = EchoMsg;

        fn name(&self) -> String {
            "sum".to_owned()
        }

        fn handle(&mut self, msg: Self::Msg) -> Result<()> {
            match msg {
                EchoMsg::Add(i) if i < 0 => Err(ProtocolError::UnexpectedReply("positive").into()),
                EchoMsg::Add(i) => {
                    self.total += i;
                    Ok(())
                }
                EchoMsg::Get(tx) => {
                    let _ = tx.send(self.total);
                    Ok(())
                }
            }
        }
    }

    #[test]
    fn test_send_in_order() {
        run_in_tokio(async move {
            let (mb, inbox) = mailbox();
            let handle = spawn(Sum { total: 0 }, mb, inbox);
            for i in 0..1000 {
                handle.mailbox().send(EchoMsg::Add(i)).unwrap();
            }
            // a rejected message does not stop the loop
            handle.mailbox().send(EchoMsg::Add(-1)).unwrap();
            let (tx, rx) = oneshot::channel();
            handle.mailbox().send(EchoMsg::Get(tx)).unwrap();
            assert_eq!(rx.await.unwrap(), 999 * 1000 / 2);

            let mb = handle.mailbox().clone();
            handle.stop().await.unwrap();
            assert!(mb.send(EchoMsg::Add(1)).is_err());
        });
    }
}
