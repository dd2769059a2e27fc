//! WiFi microscope transport.
//!
//! The device is hard-wired to 192.168.29.1 and speaks a small "JHCMD"
//! command protocol on UDP port 20000. Once nudged, it pushes JPEG frames to
//! local port 10900 as a stream of fragments: every datagram carries an 8-byte
//! header (little-endian frame counter, a reserved byte, the packet sequence
//! within the frame, four unused bytes); packet sequence 0 opens a new frame
//! and carries 16 extra bytes of device metadata before its payload. A frame
//! is complete only when packet 0 of the next frame arrives, and is handed
//! off only if the reassembled buffer is a properly delimited JPEG.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::types::{Frame, FrameSource, SourceError};

pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 29, 1);
pub const COMMAND_PORT: u16 = 20000;
pub const STREAM_PORT: u16 = 10900;

const CMD_INIT_A: &[u8] = b"JHCMD\x10\x00";
const CMD_INIT_B: &[u8] = b"JHCMD\x20\x00";
const CMD_STREAM_ON: &[u8] = b"JHCMD\xd0\x01";
const CMD_STREAM_OFF: &[u8] = b"JHCMD\xd0\x02";

const DATAGRAM_MAX: usize = 1450;
const PACKET_HEADER_LEN: usize = 8;
const FIRST_PACKET_HEADER_LEN: usize = 24;
const HEARTBEAT_EVERY_FRAMES: u64 = 50;
const READ_TIMEOUT: Duration = Duration::from_millis(200);
const CALL_SLICE: Duration = Duration::from_millis(500);

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Reassembles fragmented datagrams into whole JPEG buffers.
///
/// Socket-free so the wire protocol is testable without a device on the
/// bench.
pub(crate) struct FrameAssembler {
    buffer: Vec<u8>,
    current_frame: Option<u16>,
    frame_starts: u64,
    discarded: u64,
}

impl FrameAssembler {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            current_frame: None,
            frame_starts: 0,
            discarded: 0,
        }
    }

    /// Feed one datagram. Returns a complete, validated JPEG when this
    /// datagram opened the next frame and the previous buffer checked out.
    pub(crate) fn push(&mut self, datagram: &[u8]) -> Option<Vec<u8>> {
        if datagram.len() <= PACKET_HEADER_LEN {
            return None;
        }
        let frame_counter = u16::from_le_bytes([datagram[0], datagram[1]]);
        let packet_seq = datagram[3];

        if packet_seq != 0 {
            self.buffer.extend_from_slice(&datagram[PACKET_HEADER_LEN..]);
            return None;
        }

        let completed = if !self.buffer.is_empty() && self.current_frame != Some(frame_counter) {
            if is_delimited_jpeg(&self.buffer) {
                Some(std::mem::take(&mut self.buffer))
            } else {
                // Lost or reordered fragments; drop the frame and move on.
                self.discarded += 1;
                None
            }
        } else {
            None
        };

        self.buffer.clear();
        self.current_frame = Some(frame_counter);
        self.frame_starts += 1;
        if datagram.len() > FIRST_PACKET_HEADER_LEN {
            self.buffer
                .extend_from_slice(&datagram[FIRST_PACKET_HEADER_LEN..]);
        }
        completed
    }

    pub(crate) fn frame_starts(&self) -> u64 {
        self.frame_starts
    }

    pub(crate) fn discarded(&self) -> u64 {
        self.discarded
    }
}

fn is_delimited_jpeg(buffer: &[u8]) -> bool {
    buffer.len() >= 4 && buffer[0..2] == JPEG_SOI && buffer[buffer.len() - 2..] == JPEG_EOI
}

/// Frame source for the UDP transport.
pub struct WifiSource {
    socket: UdpSocket,
    camera_addr: SocketAddr,
    assembler: FrameAssembler,
    last_datagram: Instant,
    silence_timeout: Duration,
}

impl WifiSource {
    /// Bind the stream port, run the wake-up handshake, and start pulling.
    pub fn open(host: Ipv4Addr, silence_timeout: Duration) -> Result<Self, SourceError> {
        let camera_addr = SocketAddr::V4(SocketAddrV4::new(host, COMMAND_PORT));
        let socket = UdpSocket::bind(("0.0.0.0", STREAM_PORT)).map_err(|err| {
            warn!("failed to bind stream port {STREAM_PORT}: {err}");
            SourceError::Open {
                uri: format!("udp://{host}:{COMMAND_PORT}"),
            }
        })?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|err| SourceError::Other(err.into()))?;

        for command in [CMD_INIT_A, CMD_INIT_B, CMD_STREAM_ON, CMD_STREAM_ON] {
            socket
                .send_to(command, camera_addr)
                .map_err(|err| SourceError::Other(err.into()))?;
        }
        debug!("wifi microscope handshake sent to {camera_addr}");

        Ok(Self {
            socket,
            camera_addr,
            assembler: FrameAssembler::new(),
            last_datagram: Instant::now(),
            silence_timeout,
        })
    }

    fn send_heartbeat_if_due(&self, previous_starts: u64) {
        let starts = self.assembler.frame_starts();
        if starts != previous_starts && starts % HEARTBEAT_EVERY_FRAMES == 0 {
            if let Err(err) = self.socket.send_to(CMD_STREAM_ON, self.camera_addr) {
                warn!("heartbeat send failed: {err}");
            }
        }
    }
}

impl FrameSource for WifiSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let deadline = Instant::now() + CALL_SLICE;
        let mut datagram = [0u8; DATAGRAM_MAX + 64];

        loop {
            match self.socket.recv(&mut datagram) {
                Ok(len) => {
                    self.last_datagram = Instant::now();
                    let previous_starts = self.assembler.frame_starts();
                    let completed = self.assembler.push(&datagram[..len]);
                    self.send_heartbeat_if_due(previous_starts);

                    if let Some(jpeg) = completed {
                        match image::load_from_memory(&jpeg) {
                            Ok(decoded) => {
                                let rgb = decoded.into_rgb8();
                                let (width, height) = (rgb.width(), rgb.height());
                                return Ok(Some(Frame::new(rgb.into_raw(), width, height)));
                            }
                            Err(err) => {
                                // Delimiters were intact but the body was not;
                                // treat like any other corrupt frame.
                                debug!("discarding undecodable frame: {err}");
                            }
                        }
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    if self.last_datagram.elapsed() > self.silence_timeout {
                        return Err(SourceError::Disconnected {
                            reason: format!(
                                "no datagram for {:.1}s (discarded {} partial frames so far)",
                                self.silence_timeout.as_secs_f32(),
                                self.assembler.discarded()
                            ),
                        });
                    }
                }
                Err(err) => return Err(SourceError::Other(err.into())),
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn describe(&self) -> String {
        format!("wifi microscope at {}", self.camera_addr)
    }
}

impl Drop for WifiSource {
    fn drop(&mut self) {
        let _ = self.socket.send_to(CMD_STREAM_OFF, self.camera_addr);
    }
}

/// Cheap reachability check used by source auto-detection: poke the camera
/// and see whether anything comes back on the stream port.
pub fn probe(host: Ipv4Addr, timeout: Duration) -> bool {
    let camera_addr = SocketAddr::V4(SocketAddrV4::new(host, COMMAND_PORT));
    let socket = match UdpSocket::bind(("0.0.0.0", STREAM_PORT)) {
        Ok(socket) => socket,
        Err(_) => return false,
    };
    if socket.set_read_timeout(Some(timeout)).is_err() {
        return false;
    }
    for command in [CMD_INIT_A, CMD_INIT_B, CMD_STREAM_ON] {
        if socket.send_to(command, camera_addr).is_err() {
            return false;
        }
    }
    let mut datagram = [0u8; DATAGRAM_MAX + 64];
    matches!(socket.recv(&mut datagram), Ok(len) if len > PACKET_HEADER_LEN)
}
