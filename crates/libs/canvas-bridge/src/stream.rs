use std::io::{self, ErrorKind};

use canvas_ipc::codec::{read_frame, write_frame};
use canvas_ipc::{Inbound, Outbound};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::{Channel, InboundSender};

/// [`Channel`] over a framed byte stream: pipes, sockets or child stdio.
///
/// A writer task drains outbound messages in order; a reader task decodes
/// frames and forwards them to the bridge. Undecodable frames are skipped.
/// The inbound stream closes when the peer reaches EOF or a read fails.
pub struct StreamChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl StreamChannel {
    pub fn spawn<R, W>(reader: R, writer: W, inbound: InboundSender) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::unbounded_channel();
        Self {
            outbound,
            reader: tokio::spawn(read_loop(reader, inbound)),
            writer: tokio::spawn(write_loop(writer, rx)),
        }
    }

    /// Stops both tasks. Messages not yet written are dropped.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Channel for StreamChannel {
    fn send(&self, message: Outbound) -> io::Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "stream writer closed"))
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(err) = write_frame(&mut writer, &message).await {
            log::warn!("stream: write failed, closing writer: {err}");
            return;
        }
    }
}

async fn read_loop<R>(mut reader: R, inbound: InboundSender)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame::<Inbound, _>(&mut reader).await {
            Ok(Some(message)) => {
                if !inbound.deliver(message) {
                    return;
                }
            }
            Ok(None) => {
                log::info!("stream: peer closed the stream");
                return;
            }
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                log::warn!("stream: skipping undecodable frame: {err}");
            }
            Err(err) => {
                log::warn!("stream: read failed: {err}");
                return;
            }
        }
    }
}
