use std::future::Future;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn run_in_tokio<F>(f: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let rt = Runtime::new().unwrap();
    let out = rt.block_on(f);
    rt.shutdown_background();
    out
}

/// Collects everything already queued in `rx` without waiting.
pub fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut out = vec![];
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}
