use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use flume::{bounded, Sender};
use log::{error, info, trace};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::base::stats::Statistics;

/// Largest payload the listener accepts, anything beyond is truncated by the socket
pub const MAX_UDP_PAYLOAD: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to set up UDP listener on {addr}. Error = {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to set UDP read buffer of {size} bytes. Error = {source}")]
    ReadBuffer {
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// A single received datagram
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub received_at: SystemTime,
}

/// Binds a udp socket on `addr`, applying `read_buffer` as SO_RCVBUF unless it is 0
pub fn bind(addr: SocketAddr, read_buffer: usize) -> Result<UdpSocket, Error> {
    let bind_error = |source| Error::Bind { addr, source };
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_error)?;

    if read_buffer != 0 {
        socket
            .set_recv_buffer_size(read_buffer)
            .map_err(|source| Error::ReadBuffer { size: read_buffer, source })?;
    }

    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_error)
}

/// Reads datagrams off the socket and relays them to the parser.
///
/// A dedicated reader task issues one read at a time and hands every result over a
/// rendezvous channel. The next read is only issued once the previous payload is taken,
/// so when the relay channel is full reads stop and the kernel drops excess datagrams.
pub struct Listener {
    socket: Arc<UdpSocket>,
    relay_tx: Sender<Datagram>,
    stats: Arc<Statistics>,
}

impl Listener {
    pub fn new(socket: UdpSocket, relay_tx: Sender<Datagram>, stats: Arc<Statistics>) -> Listener {
        Listener { socket: Arc::new(socket), relay_tx, stats }
    }

    pub async fn start(self, cancel: CancellationToken) {
        let (handoff_tx, handoff_rx) = bounded(0);
        let reader = tokio::spawn(read_loop(self.socket.clone(), handoff_tx, cancel.clone()));

        loop {
            select! {
                _ = cancel.cancelled() => break,
                read = handoff_rx.recv_async() => {
                    let Ok(read) = read else {
                        break;
                    };

                    let datagram = match read {
                        Ok(datagram) => datagram,
                        Err(e) => {
                            self.stats.increment_read_fail();
                            info!("Failed to read UDP message. Error = {e}");
                            continue;
                        }
                    };

                    self.stats.add_bytes_received(datagram.payload.len() as u64);
                    select! {
                        _ = cancel.cancelled() => break,
                        r = self.relay_tx.send_async(datagram) => if r.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        // Reader observes cancellation on both its read and its handoff, it can't hang here
        drop(handoff_rx);
        if let Err(e) = reader.await {
            error!("UDP reader failed. Error = {e:?}");
        }

        // Socket closes with the last reference
        trace!("Listener stopped");
    }
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    handoff_tx: Sender<io::Result<Datagram>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];

    loop {
        let read = select! {
            _ = cancel.cancelled() => break,
            read = socket.recv(&mut buf) => read,
        };

        // Copy out of the reused read buffer
        let read = read.map(|len| Datagram {
            payload: Bytes::copy_from_slice(&buf[..len]),
            received_at: SystemTime::now(),
        });

        select! {
            _ = cancel.cancelled() => break,
            r = handoff_tx.send_async(read) => if r.is_err() {
                break;
            }
        }
    }
}
