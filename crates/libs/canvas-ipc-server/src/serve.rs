use std::io::{self, ErrorKind};
use std::sync::Arc;

use canvas_ipc::codec::{read_frame, write_frame};
use canvas_ipc::{Backend, Inbound, Outbound, ReadySignal};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::dispatch::dispatch;

/// Serves `backend` over a framed stream until the reader reaches EOF.
///
/// Writes a [`ReadySignal`] before reading anything. Undecodable frames are
/// logged and skipped; any other read or write error ends the session. Returns
/// once every dispatched request has been answered.
pub async fn serve<R, W>(backend: Arc<dyn Backend>, mut reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = rx.recv().await {
            write_frame(&mut writer, &message).await?;
        }
        Ok::<(), io::Error>(())
    });

    let _ = tx.send(Inbound::Ready(ReadySignal::ready()));
    log::info!("ipc-server: ready");

    let read_result = loop {
        match read_frame::<Outbound, _>(&mut reader).await {
            Ok(Some(outbound)) => {
                log::trace!("ipc-server: << {} request(s)", outbound.len());
                for request in outbound.into_requests() {
                    let backend = backend.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = dispatch(backend.as_ref(), request).await;
                        let _ = tx.send(Inbound::Response(response));
                    });
                }
            }
            Ok(None) => break Ok(()),
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                log::warn!("ipc-server: skipping undecodable frame: {err}");
            }
            Err(err) => break Err(err),
        }
    };

    drop(tx);
    let write_result = writer_task.await.map_err(|err| io::Error::new(ErrorKind::Other, err))?;
    read_result.and(write_result)
}
