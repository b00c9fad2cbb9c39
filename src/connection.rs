//! DDP client connection: owns the datagram transport and the rolling
//! sequence counter, and splits full pixel buffers into wire packets.

use anyhow::{Context, Result};
use log::debug;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::protocol::{DdpPacket, DDP_FLAGS_PUSH, DDP_ID_PIXELS, DDP_TYPE_DATA};

/// Default DDP UDP port, applied when the destination omits one.
pub const DDP_PORT: u16 = 4048;

/// Default per-packet payload limit. Keeps each datagram under a typical
/// network MTU after the 10-byte DDP prefix and UDP/IP overhead.
pub const MAX_CHANS_PER_PACKET: usize = 1440;

const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Datagram transport the connection writes to: a `UdpSocket` in
/// production, an in-memory sink in tests.
pub trait PacketSink {
    fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize>;
}

impl PacketSink for UdpSocket {
    fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, dst)
    }
}

/// One DDP client connection. The sequence counter is per-connection, so
/// independent light runs never share sequencing. Not safe for concurrent
/// senders; each run's controller owns its connection exclusively.
pub struct DdpConnection {
    sink: Box<dyn PacketSink + Send>,
    seq: u8,
    max_chans_per_packet: usize,
    verbose: bool,
}

impl DdpConnection {
    /// Opens a UDP socket on an ephemeral port. The write timeout keeps a
    /// pathological send from stalling the controller loop.
    pub fn new(max_chans_per_packet: usize, verbose: bool) -> Result<DdpConnection> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind UDP socket")?;
        socket
            .set_write_timeout(Some(SEND_TIMEOUT))
            .context("failed to set socket write timeout")?;

        Ok(Self::with_sink(
            Box::new(socket),
            max_chans_per_packet,
            verbose,
        ))
    }

    /// Builds a connection over an arbitrary sink; tests use this to
    /// capture the packet stream.
    pub fn with_sink(
        sink: Box<dyn PacketSink + Send>,
        max_chans_per_packet: usize,
        verbose: bool,
    ) -> DdpConnection {
        DdpConnection {
            sink,
            seq: 1,
            max_chans_per_packet,
            verbose,
        }
    }

    /// Post-increments the sequence counter, wrapping 15 back to 1. Zero is
    /// reserved on the wire to mean "sequence numbering not in use" and is
    /// never emitted.
    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq += 1;
        if self.seq > 15 {
            self.seq = 1;
        }
        seq
    }

    fn data_frame(&mut self, offset: usize, chans: &[u8], push: bool) -> DdpPacket {
        let mut packet = DdpPacket::new();
        if push {
            packet.set_flags(DDP_FLAGS_PUSH);
        }
        packet.set_seq(self.next_seq());
        packet.set_type(DDP_TYPE_DATA);
        packet.set_id(DDP_ID_PIXELS);
        packet.set_data(offset, chans);
        packet
    }

    fn send_packet(&self, packet: &DdpPacket, dst: SocketAddr) -> Result<()> {
        let frame = packet.encode();
        if self.verbose {
            debug!("sending {} bytes to {}: {:02x?}", frame.len(), dst, frame);
        }

        self.sink
            .send_to(&frame, dst)
            .with_context(|| format!("failed to send packet to {dst}"))?;
        Ok(())
    }

    /// Streams `chans` to `dst` as one logical frame: consecutive chunks of
    /// at most the configured payload size, with the push flag on the final
    /// chunk only. An empty buffer still produces a single zero-length push
    /// packet ("all pixels off"). The first transport error aborts the
    /// remaining chunks and is returned to the caller.
    pub fn set_pixels(&mut self, chans: &[u8], dst: SocketAddr) -> Result<()> {
        let mut rest = chans;
        let mut offset = 0;

        loop {
            // Whether this is the last slice is decided before slicing, so
            // a buffer that is an exact multiple of the chunk size does not
            // grow a spurious empty trailer.
            let last = rest.len() <= self.max_chans_per_packet;
            let chunk = if last {
                rest
            } else {
                &rest[..self.max_chans_per_packet]
            };

            let packet = self.data_frame(offset, chunk, last);
            self.send_packet(&packet, dst)?;

            if last {
                return Ok(());
            }
            rest = &rest[self.max_chans_per_packet..];
            offset += self.max_chans_per_packet;
        }
    }
}

/// Appends the default DDP port when `addr` does not name one.
pub fn maybe_add_ddp_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{DDP_PORT}")
    }
}

/// Resolves a `host[:port]` destination, defaulting the port to 4048.
pub fn resolve_destination(addr: &str) -> Result<SocketAddr> {
    let with_port = maybe_add_ddp_port(addr);
    with_port
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {with_port}"))?
        .next()
        .with_context(|| format!("no addresses found for {with_port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type SentPackets = Arc<Mutex<Vec<(Vec<u8>, SocketAddr)>>>;

    /// Records every packet; calls numbered `fail_from` and later (1-based)
    /// return an error instead of recording.
    struct CaptureSink {
        sent: SentPackets,
        calls: Mutex<usize>,
        fail_from: usize,
    }

    impl CaptureSink {
        fn reliable(sent: SentPackets) -> CaptureSink {
            CaptureSink {
                sent,
                calls: Mutex::new(0),
                fail_from: usize::MAX,
            }
        }

        fn failing_from(sent: SentPackets, fail_from: usize) -> CaptureSink {
            CaptureSink {
                sent,
                calls: Mutex::new(0),
                fail_from,
            }
        }
    }

    impl PacketSink for CaptureSink {
        fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls >= self.fail_from {
                return Err(io::Error::new(io::ErrorKind::Other, "send failed"));
            }
            self.sent.lock().unwrap().push((buf.to_vec(), dst));
            Ok(buf.len())
        }
    }

    fn test_conn(max_chans: usize) -> (DdpConnection, SentPackets) {
        let sent: SentPackets = Arc::new(Mutex::new(Vec::new()));
        let sink = CaptureSink::reliable(Arc::clone(&sent));
        (DdpConnection::with_sink(Box::new(sink), max_chans, true), sent)
    }

    fn dst() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 3454))
    }

    #[test]
    fn test_set_pixels_single_packet() {
        let (mut conn, sent) = test_conn(5);

        conn.set_pixels(&[0x11, 0x22, 0x33], dst()).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let want = vec![
            0x41, 0x01, 0x01, 0x01, // header with push
            0x00, 0x00, 0x00, 0x00, // offset
            0x00, 0x03, // length
            0x11, 0x22, 0x33, // payload
        ];
        assert_eq!(sent[0], (want, dst()));
    }

    #[test]
    fn test_set_pixels_multi_packet() {
        let (mut conn, sent) = test_conn(5);

        conn.set_pixels(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88], dst())
            .unwrap();

        let sent = sent.lock().unwrap();
        let want = vec![
            (
                vec![
                    0x40, 0x01, 0x01, 0x01, // header, no push
                    0x00, 0x00, 0x00, 0x00, // offset
                    0x00, 0x05, // length
                    0x11, 0x22, 0x33, 0x44, 0x55, // payload
                ],
                dst(),
            ),
            (
                vec![
                    0x41, 0x02, 0x01, 0x01, // header with push
                    0x00, 0x00, 0x00, 0x05, // offset
                    0x00, 0x03, // length
                    0x66, 0x77, 0x88, // payload
                ],
                dst(),
            ),
        ];
        assert_eq!(*sent, want);
    }

    #[test]
    fn test_set_pixels_empty_buffer_sends_one_push_packet() {
        let (mut conn, sent) = test_conn(5);

        conn.set_pixels(&[], dst()).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0].0;
        assert_eq!(frame.len(), 10);
        assert_eq!(frame[0], 0x41); // push set
        assert_eq!(&frame[8..10], &[0, 0]);
    }

    #[test]
    fn test_set_pixels_exact_multiple_has_no_empty_trailer() {
        let (mut conn, sent) = test_conn(5);

        conn.set_pixels(&[0u8; 10], dst()).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0[0], 0x40);
        assert_eq!(sent[1].0[0], 0x41);
        assert_eq!(&sent[1].0[8..10], &[0, 5]);
    }

    #[test]
    fn test_chunks_reassemble_to_original_buffer() {
        let (mut conn, sent) = test_conn(5);
        let buffer: Vec<u8> = (0..13).collect();

        conn.set_pixels(&buffer, dst()).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3); // ceil(13 / 5)

        let mut reassembled = Vec::new();
        for (i, (frame, _)) in sent.iter().enumerate() {
            let offset = u32::from_be_bytes(frame[4..8].try_into().unwrap()) as usize;
            let len = u16::from_be_bytes(frame[8..10].try_into().unwrap()) as usize;
            assert_eq!(offset, reassembled.len());
            assert_eq!(len, frame.len() - 10);

            let push = frame[0] & 0x01 != 0;
            assert_eq!(push, i == sent.len() - 1);

            reassembled.extend_from_slice(&frame[10..]);
        }
        assert_eq!(reassembled, buffer);
    }

    #[test]
    fn test_sequence_wraps_and_never_emits_zero() {
        let (mut conn, sent) = test_conn(5);

        for _ in 0..20 {
            conn.set_pixels(&[0xaa], dst()).unwrap();
        }

        let sent = sent.lock().unwrap();
        let seqs: Vec<u8> = sent.iter().map(|(frame, _)| frame[1]).collect();
        let mut want: Vec<u8> = (1..=15).collect();
        want.extend(1..=5);
        assert_eq!(seqs, want);
    }

    #[test]
    fn test_first_send_error_aborts_remaining_chunks() {
        let sent: SentPackets = Arc::new(Mutex::new(Vec::new()));
        let sink = CaptureSink::failing_from(Arc::clone(&sent), 2);
        let mut conn = DdpConnection::with_sink(Box::new(sink), 5, false);

        let err = conn.set_pixels(&[0u8; 15], dst()).unwrap_err();
        assert!(err.to_string().contains("failed to send"));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_maybe_add_ddp_port() {
        assert_eq!(maybe_add_ddp_port("10.0.0.7"), "10.0.0.7:4048");
        assert_eq!(maybe_add_ddp_port("10.0.0.7:3454"), "10.0.0.7:3454");
    }

    #[test]
    fn test_resolve_destination_defaults_port() {
        let addr = resolve_destination("127.0.0.1").unwrap();
        assert_eq!(addr.port(), DDP_PORT);
    }
}
