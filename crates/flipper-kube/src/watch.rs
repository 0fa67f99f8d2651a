//! Record change notifications.

use futures_util::StreamExt;
use kube::Api;
use kube::runtime::{WatchStreamExt, watcher};
use tracing::{info, warn};

use flipper_core::{RecordRef, Shutdown};

use crate::crd::RollingUpdate;
use crate::store::record_ref;

/// Call `on_change` for every `RollingUpdate` created or modified under
/// `api` until `shutdown` fires. Watch errors are logged and the stream
/// reconnects with backoff.
pub async fn watch_records<F>(api: Api<RollingUpdate>, mut on_change: F, shutdown: Shutdown)
where
    F: FnMut(RecordRef) + Send,
{
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects();
    let mut stream = std::pin::pin!(stream);

    info!("watching rollingupdates");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(resource)) => on_change(record_ref(&resource)),
                Some(Err(e)) => warn!(error = %e, "rollingupdate watch error"),
                None => break,
            },
        }
    }
    info!("record watch stopped");
}
