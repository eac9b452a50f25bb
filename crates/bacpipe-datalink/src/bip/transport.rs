use crate::bip::bvlc::{BvlcFunction, BvlcHeader};
use crate::{DataLink, DataLinkAddress, DataLinkError};
use bacpipe_core::encoding::{reader::Reader, writer::Writer};
use log::trace;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

const MAX_BIP_FRAME_LEN: usize = 1600;

/// Plain BACnet/IP over UDP. Unicast NPDUs go out as Original-Unicast,
/// broadcasts as Original-Broadcast on the local subnet.
#[derive(Debug, Clone)]
pub struct BacnetIpTransport {
    socket: Arc<UdpSocket>,
}

impl BacnetIpTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, DataLinkError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        self.socket.local_addr().map_err(DataLinkError::Io)
    }
}

impl DataLink for BacnetIpTransport {
    async fn send(&self, address: DataLinkAddress, payload: &[u8]) -> Result<(), DataLinkError> {
        let addr = address.as_socket_addr();
        let is_broadcast = matches!(addr.ip(), IpAddr::V4(v4) if v4.is_broadcast());

        let function = if is_broadcast {
            BvlcFunction::OriginalBroadcastNpdu
        } else {
            BvlcFunction::OriginalUnicastNpdu
        };

        let mut frame = [0u8; MAX_BIP_FRAME_LEN];
        let total_len = 4usize
            .checked_add(payload.len())
            .ok_or(DataLinkError::FrameTooLarge)?;
        if total_len > frame.len() {
            return Err(DataLinkError::FrameTooLarge);
        }

        let mut w = Writer::new(&mut frame);
        BvlcHeader {
            function,
            length: total_len as u16,
        }
        .encode(&mut w)
        .map_err(|_| DataLinkError::InvalidFrame)?;
        w.write_all(payload)
            .map_err(|_| DataLinkError::FrameTooLarge)?;

        trace!("bip send {} bytes to {addr}", total_len);
        self.socket.send_to(w.as_written(), addr).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
        let mut frame = [0u8; MAX_BIP_FRAME_LEN];
        let (n, src) = self.socket.recv_from(&mut frame).await?;
        let mut r = Reader::new(&frame[..n]);
        let hdr = BvlcHeader::decode(&mut r).map_err(|_| DataLinkError::InvalidFrame)?;

        match hdr.function {
            BvlcFunction::OriginalUnicastNpdu
            | BvlcFunction::OriginalBroadcastNpdu
            | BvlcFunction::DistributeBroadcastToNetwork => {
                let payload_len = hdr.length as usize - 4;
                let payload = r
                    .read_exact(payload_len)
                    .map_err(|_| DataLinkError::InvalidFrame)?;
                if payload.len() > buf.len() {
                    return Err(DataLinkError::FrameTooLarge);
                }
                buf[..payload.len()].copy_from_slice(payload);
                Ok((payload.len(), DataLinkAddress::Ip(src)))
            }
            BvlcFunction::ForwardedNpdu => {
                // A BBMD on the subnet relays remote broadcasts with the
                // original sender's ip:port prefixed to the NPDU.
                let forwarded = r
                    .read_exact(hdr.length as usize - 4)
                    .map_err(|_| DataLinkError::InvalidFrame)?;
                if forwarded.len() < 6 {
                    return Err(DataLinkError::InvalidFrame);
                }
                let origin_ip =
                    Ipv4Addr::new(forwarded[0], forwarded[1], forwarded[2], forwarded[3]);
                let origin_port = u16::from_be_bytes([forwarded[4], forwarded[5]]);
                let payload = &forwarded[6..];
                if payload.len() > buf.len() {
                    return Err(DataLinkError::FrameTooLarge);
                }
                buf[..payload.len()].copy_from_slice(payload);
                Ok((
                    payload.len(),
                    DataLinkAddress::Ip(SocketAddr::new(IpAddr::V4(origin_ip), origin_port)),
                ))
            }
            BvlcFunction::Unknown(v) => Err(DataLinkError::UnsupportedBvlcFunction(v)),
            _ => Err(DataLinkError::InvalidFrame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BacnetIpTransport;
    use crate::bip::bvlc::{BvlcFunction, BvlcHeader, BVLC_TYPE_BIP};
    use crate::{DataLink, DataLinkAddress, DataLinkError};
    use bacpipe_core::encoding::{reader::Reader, writer::Writer};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn unicast_roundtrip_between_transports() {
        let a = BacnetIpTransport::bind(localhost()).await.unwrap();
        let b = BacnetIpTransport::bind(localhost()).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send(DataLinkAddress::Ip(b_addr), &[0x01, 0x00, 0x10, 0x08])
            .await
            .unwrap();

        let mut out = [0u8; 64];
        let (n, src) = b.recv(&mut out).await.unwrap();
        assert_eq!(&out[..n], &[0x01, 0x00, 0x10, 0x08]);
        assert_eq!(src.as_socket_addr(), a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn unicast_sends_original_unicast_function() {
        let transport = BacnetIpTransport::bind(localhost()).await.unwrap();
        let peer = UdpSocket::bind(localhost()).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        transport
            .send(DataLinkAddress::Ip(peer_addr), &[1, 2, 3])
            .await
            .unwrap();

        let mut recv = [0u8; 64];
        let (n, _) = peer.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        let hdr = BvlcHeader::decode(&mut r).unwrap();
        assert_eq!(hdr.function, BvlcFunction::OriginalUnicastNpdu);
        assert_eq!(hdr.length, 7);
    }

    #[tokio::test]
    async fn recv_forwarded_npdu_returns_forwarded_origin() {
        let transport = BacnetIpTransport::bind(localhost()).await.unwrap();
        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind(localhost()).await.unwrap();

        let mut frame = [0u8; 64];
        let mut w = Writer::new(&mut frame);
        BvlcHeader {
            function: BvlcFunction::ForwardedNpdu,
            length: 4 + 6 + 3,
        }
        .encode(&mut w)
        .unwrap();
        w.write_all(&[10, 1, 2, 3]).unwrap();
        w.write_be_u16(47808).unwrap();
        w.write_all(&[1, 2, 3]).unwrap();

        sender.send_to(w.as_written(), target).await.unwrap();

        let mut out = [0u8; 16];
        let (n, src) = transport.recv(&mut out).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(
            src,
            DataLinkAddress::Ip(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
                47808
            ))
        );
    }

    #[tokio::test]
    async fn unknown_bvlc_function_errors() {
        let transport = BacnetIpTransport::bind(localhost()).await.unwrap();
        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind(localhost()).await.unwrap();

        let frame = [BVLC_TYPE_BIP, 0x99, 0x00, 0x04];
        sender.send_to(&frame, target).await.unwrap();

        let mut out = [0u8; 16];
        let err = transport.recv(&mut out).await.unwrap_err();
        assert!(matches!(err, DataLinkError::UnsupportedBvlcFunction(0x99)));
    }
}
