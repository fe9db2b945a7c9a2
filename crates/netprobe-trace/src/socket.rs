//! Raw packet I/O.
//!
//! A [`Source`] captures inbound frames and a [`Sink`] transmits complete IP
//! packets. On Linux the source is an AF_PACKET socket (sees ICMP errors and
//! TCP replies alike) and the sink is a raw socket with IP_HDRINCL; other
//! platforms report the prober as unavailable.

use async_trait::async_trait;
use netprobe_core::ProbeError;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Captures inbound frames, delivered starting at the IP layer.
#[async_trait]
pub trait Source: Send {
    /// Sets the deadline after which reads fail with `ReadTimeout`.
    fn set_read_deadline(&mut self, deadline: Instant);

    /// Reads one frame into `buf`, returning its length.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProbeError>;

    /// Closes the source.
    async fn close(&mut self) -> Result<(), ProbeError>;
}

/// Transmits complete IP packets.
#[async_trait]
pub trait Sink: Send {
    /// Writes one packet toward `addr`.
    async fn write_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<(), ProbeError>;

    /// Closes the sink.
    async fn close(&mut self) -> Result<(), ProbeError>;
}

/// A paired source and sink for one probing session.
pub struct Channel {
    /// Capture side.
    pub source: Box<dyn Source>,
    /// Transmit side.
    pub sink: Box<dyn Sink>,
}

/// Opens a raw packet channel appropriate for the current platform.
pub fn open_channel(target: IpAddr) -> Result<Channel, ProbeError> {
    imp::open_channel(target)
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use std::io::Read;
    use std::os::fd::{FromRawFd, RawFd};

    const ETH_P_ALL: u16 = 0x0003;
    const ETH_HLEN: usize = 14;

    /// AF_PACKET capture source.
    pub struct PacketSource {
        file: std::fs::File,
        read_deadline: Option<Instant>,
    }

    impl PacketSource {
        pub fn new() -> Result<Self, ProbeError> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                    (ETH_P_ALL.to_be()) as i32,
                )
            };
            if fd < 0 {
                return Err(ProbeError::SocketCreation(std::io::Error::last_os_error()));
            }

            let file = unsafe { std::fs::File::from_raw_fd(fd) };
            Ok(Self {
                file,
                read_deadline: None,
            })
        }

        /// Strips the Ethernet header, keeping only IPv4/IPv6 frames.
        fn strip_ethernet(buf: &[u8]) -> Result<&[u8], ProbeError> {
            if buf.len() < ETH_HLEN {
                return Err(ProbeError::PacketTooShort {
                    expected: ETH_HLEN,
                    actual: buf.len(),
                });
            }
            let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
            if ethertype != 0x0800 && ethertype != 0x86DD {
                return Err(ProbeError::PacketMismatch);
            }
            Ok(&buf[ETH_HLEN..])
        }
    }

    #[async_trait]
    impl Source for PacketSource {
        fn set_read_deadline(&mut self, deadline: Instant) {
            self.read_deadline = Some(deadline);
        }

        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProbeError> {
            let mut raw = vec![0u8; buf.len() + ETH_HLEN];

            loop {
                match (&self.file).read(&mut raw) {
                    Ok(n) => match Self::strip_ethernet(&raw[..n]) {
                        Ok(payload) => {
                            let len = payload.len().min(buf.len());
                            buf[..len].copy_from_slice(&payload[..len]);
                            return Ok(len);
                        }
                        // Not an IP frame; keep reading.
                        Err(ProbeError::PacketMismatch) => continue,
                        Err(e) => return Err(e),
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        if let Some(deadline) = self.read_deadline {
                            if Instant::now() >= deadline {
                                return Err(ProbeError::ReadTimeout);
                            }
                        }
                        tokio::task::yield_now().await;
                    }
                    Err(e) => return Err(ProbeError::from(e)),
                }
            }
        }

        async fn close(&mut self) -> Result<(), ProbeError> {
            // fd is owned by the File and closed on drop.
            Ok(())
        }
    }

    /// Raw IP sink with IP_HDRINCL set: we build the full IP header.
    pub struct RawIpSink {
        fd: RawFd,
        closed: bool,
    }

    impl RawIpSink {
        pub fn new(target: IpAddr) -> Result<Self, ProbeError> {
            let (domain, level, hdrincl) = match target {
                IpAddr::V4(_) => (libc::AF_INET, libc::IPPROTO_IP, libc::IP_HDRINCL),
                IpAddr::V6(_) => (libc::AF_INET6, libc::IPPROTO_IPV6, 36 /* IPV6_HDRINCL */),
            };

            let fd = unsafe {
                libc::socket(domain, libc::SOCK_RAW | libc::SOCK_NONBLOCK, libc::IPPROTO_RAW)
            };
            if fd < 0 {
                return Err(ProbeError::SocketCreation(std::io::Error::last_os_error()));
            }

            let one: i32 = 1;
            let rc = unsafe {
                libc::setsockopt(
                    fd,
                    level,
                    hdrincl,
                    std::ptr::addr_of!(one).cast(),
                    std::mem::size_of::<i32>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(ProbeError::Internal(format!(
                    "Failed to set IP_HDRINCL: {}",
                    err
                )));
            }

            Ok(Self { fd, closed: false })
        }
    }

    impl Drop for RawIpSink {
        fn drop(&mut self) {
            if !self.closed {
                unsafe { libc::close(self.fd) };
            }
        }
    }

    #[async_trait]
    impl Sink for RawIpSink {
        async fn write_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<(), ProbeError> {
            loop {
                let rc = match addr {
                    SocketAddr::V4(v4) => {
                        let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
                        sa.sin_family = libc::AF_INET as libc::sa_family_t;
                        sa.sin_port = v4.port().to_be();
                        sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                        unsafe {
                            libc::sendto(
                                self.fd,
                                buf.as_ptr().cast(),
                                buf.len(),
                                0,
                                std::ptr::addr_of!(sa).cast(),
                                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                            )
                        }
                    }
                    SocketAddr::V6(v6) => {
                        let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
                        sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                        sa.sin6_port = v6.port().to_be();
                        sa.sin6_addr.s6_addr = v6.ip().octets();
                        unsafe {
                            libc::sendto(
                                self.fd,
                                buf.as_ptr().cast(),
                                buf.len(),
                                0,
                                std::ptr::addr_of!(sa).cast(),
                                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                            )
                        }
                    }
                };

                if rc >= 0 {
                    return Ok(());
                }

                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    tokio::task::yield_now().await;
                    continue;
                }
                return Err(ProbeError::WriteFailed(err));
            }
        }

        async fn close(&mut self) -> Result<(), ProbeError> {
            if !self.closed {
                self.closed = true;
                unsafe { libc::close(self.fd) };
            }
            Ok(())
        }
    }

    pub fn open_channel(target: IpAddr) -> Result<Channel, ProbeError> {
        let source = PacketSource::new()?;
        let sink = RawIpSink::new(target)?;
        Ok(Channel {
            source: Box::new(source),
            sink: Box::new(sink),
        })
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    pub fn open_channel(_target: IpAddr) -> Result<Channel, ProbeError> {
        Err(ProbeError::ProberUnavailable)
    }
}
