//! Event channel: TCP connection to the backend's push-notification port.
//!
//! Inbound frames are decoded into `Notification`s and forwarded to the core
//! in arrival order.  Outbound `ClientRequest`s are written as they come in.
//! On every (re)connect a `RequestState` is sent first so the reconciler
//! resyncs from a full snapshot.

use std::time::Duration;

use amp_proto::frame::{self, Decoded};
use amp_proto::protocol::{ClientRequest, Notification};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::CoreEvent;

/// Why a connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Disconnect {
    /// Peer closed or the stream errored; try again.
    Lost,
    /// Token cancelled or the core went away; stop for good.
    Stop,
}

pub fn start(
    address: String,
    reconnect_delay: Duration,
    core_tx: mpsc::Sender<CoreEvent>,
    mut requests: mpsc::Receiver<ClientRequest>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match TcpStream::connect(&address).await {
                Ok(stream) => {
                    info!("event channel connected to {}", address);
                    if core_tx.send(CoreEvent::ChannelStatus(true)).await.is_err() {
                        break;
                    }
                    let why = run_connection(stream, &core_tx, &mut requests, &cancel).await;
                    let _ = core_tx.send(CoreEvent::ChannelStatus(false)).await;
                    if why == Disconnect::Stop {
                        break;
                    }
                }
                Err(e) => {
                    warn!("event channel: connect to {} failed: {}", address, e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
        info!("event channel task exiting");
    })
}

async fn run_connection(
    stream: TcpStream,
    core_tx: &mpsc::Sender<CoreEvent>,
    requests: &mut mpsc::Receiver<ClientRequest>,
    cancel: &CancellationToken,
) -> Disconnect {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = frame::encode(&ClientRequest::RequestState) {
        if let Err(e) = write_half.write_all(&encoded).await {
            warn!("event channel: initial state request failed: {}", e);
            return Disconnect::Lost;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Disconnect::Stop,

            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("event channel closed by backend");
                        return Disconnect::Lost;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        match drain_frames(&mut read_buf, core_tx).await {
                            Ok(true) => {}
                            Ok(false) => return Disconnect::Stop,
                            Err(e) => {
                                error!("event channel: {}; reconnecting", e);
                                return Disconnect::Lost;
                            }
                        }
                    }
                    Err(e) => {
                        error!("event channel read error: {}", e);
                        return Disconnect::Lost;
                    }
                }
            }

            req = requests.recv() => {
                let Some(req) = req else {
                    return Disconnect::Stop;
                };
                debug!("event channel: sending {:?}", req);
                match frame::encode(&req) {
                    Ok(encoded) => {
                        if let Err(e) = write_half.write_all(&encoded).await {
                            warn!("event channel write error: {}", e);
                            return Disconnect::Lost;
                        }
                    }
                    Err(e) => warn!("event channel: could not encode {:?}: {}", req, e),
                }
            }
        }
    }
}

/// Forward every complete frame in `buf` to the core.  Returns `Ok(false)`
/// if the core is gone, `Err` if the stream can't be resynchronised.
async fn drain_frames(buf: &mut Vec<u8>, core_tx: &mpsc::Sender<CoreEvent>) -> anyhow::Result<bool> {
    loop {
        match frame::decode::<Notification>(buf)? {
            Decoded::Incomplete => return Ok(true),
            Decoded::Frame { value, consumed } => {
                buf.drain(..consumed);
                if core_tx.send(CoreEvent::Notification(value)).await.is_err() {
                    return Ok(false);
                }
            }
            Decoded::Invalid { error, consumed } => {
                buf.drain(..consumed);
                warn!("event channel: dropping undecodable frame: {}", error);
            }
        }
    }
}
