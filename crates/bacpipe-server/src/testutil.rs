//! In-process datalink fake for exercising the responder without sockets.

use bacpipe_datalink::{DataLink, DataLinkAddress, DataLinkError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

type Frame = (Vec<u8>, DataLinkAddress);

/// One end of a bidirectional in-memory link. Frames sent from one end
/// are delivered to the other, stamped with the sender's address.
pub struct ChannelDataLink {
    local: DataLinkAddress,
    to_peer: UnboundedSender<Frame>,
    from_peer: Mutex<UnboundedReceiver<Frame>>,
    /// Destination addresses of every frame sent from this end.
    sent_to: std::sync::Mutex<Vec<DataLinkAddress>>,
}

impl ChannelDataLink {
    pub fn pair(addr_a: DataLinkAddress, addr_b: DataLinkAddress) -> (Self, Self) {
        let (a_tx, b_rx) = unbounded_channel();
        let (b_tx, a_rx) = unbounded_channel();
        (
            Self {
                local: addr_a,
                to_peer: a_tx,
                from_peer: Mutex::new(a_rx),
                sent_to: std::sync::Mutex::new(Vec::new()),
            },
            Self {
                local: addr_b,
                to_peer: b_tx,
                from_peer: Mutex::new(b_rx),
                sent_to: std::sync::Mutex::new(Vec::new()),
            },
        )
    }

    pub fn destinations(&self) -> Vec<DataLinkAddress> {
        self.sent_to.lock().unwrap().clone()
    }
}

impl DataLink for ChannelDataLink {
    async fn send(&self, address: DataLinkAddress, payload: &[u8]) -> Result<(), DataLinkError> {
        self.sent_to.lock().unwrap().push(address);
        self.to_peer
            .send((payload.to_vec(), self.local))
            .map_err(|_| {
                DataLinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "peer closed",
                ))
            })
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
        let mut rx = self.from_peer.lock().await;
        let (frame, src) = rx.recv().await.ok_or_else(|| {
            DataLinkError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed",
            ))
        })?;
        if frame.len() > buf.len() {
            return Err(DataLinkError::FrameTooLarge);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok((frame.len(), src))
    }
}

pub fn test_addr(last_octet: u8) -> DataLinkAddress {
    DataLinkAddress::Ip(SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)),
        47808,
    ))
}
