//! Serial link ownership and the I/O worker.
//!
//! The worker is the only task touching the serial port: it heals the
//! link (scan, open, reopen on error), feeds the deframer, and fans the
//! results out — UBX frames to the controller inbox, RTCM3 frames to the
//! UDP broadcaster. Outbound configuration bytes arrive through a
//! mailbox and are written ahead of any reading.

use log::{debug, error, info, trace, warn};

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};

use tokio::sync::{mpsc, watch};

use crate::protocol::{ubx::UbxFrame, Frame, Framer};

pub mod broadcast;

use broadcast::Broadcaster;

pub const UBLOX_VID: u16 = 0x1546;
pub const UBLOX_PID: u16 = 0x01A8;

const BAUD_RATE: u32 = 115_200;

/// Device scan period while no receiver is attached.
const SCAN_PERIOD: Duration = Duration::from_millis(100);

/// Idle sleep between ticks that did no work.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Consecutive checksum failures worth telling the operator about.
const MALFORMED_WARN_THRESHOLD: u32 = 100;

pub struct IoWorker {
    port: Option<Box<dyn SerialPort>>,
    framer: Framer,

    /// Decoded UBX frames towards the controller
    inbox: mpsc::UnboundedSender<UbxFrame>,

    /// Outbound configuration bytes from the controller
    mailbox: mpsc::UnboundedReceiver<Vec<u8>>,

    broadcaster: Broadcaster,
    udp_stream_active: Arc<AtomicBool>,
    link_ready: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,

    warned_malformed: bool,
}

impl IoWorker {
    pub fn new(
        inbox: mpsc::UnboundedSender<UbxFrame>,
        mailbox: mpsc::UnboundedReceiver<Vec<u8>>,
        broadcaster: Broadcaster,
        udp_stream_active: Arc<AtomicBool>,
        link_ready: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            port: None,
            framer: Framer::new(),
            inbox,
            mailbox,
            broadcaster,
            udp_stream_active,
            link_ready,
            shutdown,
            warned_malformed: false,
        }
    }

    /// Thread entry point. Returns once shutdown is signalled.
    pub fn run(mut self) {
        info!("I/O worker deployed");

        while !*self.shutdown.borrow() {
            if self.port.is_none() {
                self.wait_for_receiver();
                continue;
            }

            if !self.tick() {
                thread::sleep(IDLE_SLEEP);
            }
        }

        info!("I/O worker stopped");
    }

    /// Polls the USB bus until the receiver shows up and opens.
    fn wait_for_receiver(&mut self) {
        info!(
            "scanning for u-blox receiver {:04x}:{:04x}",
            UBLOX_VID, UBLOX_PID
        );

        while !*self.shutdown.borrow() {
            if let Some(name) = locate_receiver_port() {
                match serialport::new(&name, BAUD_RATE)
                    .timeout(READ_TIMEOUT)
                    .open()
                {
                    Ok(port) => {
                        info!("connected to receiver on {}", name);
                        self.port = Some(port);
                        self.framer = Framer::new();
                        self.link_ready.store(true, Ordering::Release);
                        return;
                    },
                    Err(e) => {
                        debug!("cannot open {}: {}", name, e);
                    },
                }
            }

            thread::sleep(SCAN_PERIOD);
        }
    }

    /// One pass over mailbox, link and deframer. Returns whether any
    /// byte moved.
    fn tick(&mut self) -> bool {
        let mut worked = false;

        // outbound first: configuration must not queue behind reads
        while let Ok(bytes) = self.mailbox.try_recv() {
            worked = true;

            if let Err(e) = self.write_link(&bytes) {
                self.drop_link("write", &e);
                return true;
            }
        }

        let mut buf = [0u8; 4096];

        match self.read_link(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                self.framer.extend(&buf[..n]);
                worked = true;
            },
            Err(e) => {
                self.drop_link("read", &e);
                return true;
            },
        }

        while let Some(frame) = self.framer.next_frame() {
            worked = true;
            self.dispatch(frame);
        }

        let malformed = self.framer.consecutive_malformed();
        if malformed > MALFORMED_WARN_THRESHOLD && !self.warned_malformed {
            warn!("{} consecutive UBX frames failed their checksum", malformed);
            self.warned_malformed = true;
        } else if malformed == 0 {
            self.warned_malformed = false;
        }

        worked
    }

    fn write_link(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.port.as_mut() {
            Some(port) => port.write_all(bytes),
            None => Ok(()),
        }
    }

    /// Reads whatever the link has, timeouts mapped to "no data".
    fn read_link(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Ok(0),
        };

        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn drop_link(&mut self, op: &str, e: &std::io::Error) {
        error!("serial {} failed: {}, rescanning", op, e);
        self.link_ready.store(false, Ordering::Release);
        self.port = None;
    }

    fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Ubx(bytes) => {
                let msg = UbxFrame::from_frame_bytes(&bytes);
                trace!(
                    "UBX {:02X} {:02X} ({} bytes)",
                    msg.class,
                    msg.id,
                    msg.payload.len()
                );

                // failure means the controller is gone, i.e. shutdown
                let _ = self.inbox.send(msg);
            },
            Frame::Rtcm(bytes) => {
                if self.udp_stream_active.load(Ordering::Relaxed) {
                    trace!("RTCM3 frame ({} bytes)", bytes.len());
                    self.broadcaster.send(&bytes);
                }
            },
            Frame::Nmea(bytes) => {
                trace!("discarding NMEA sentence ({} bytes)", bytes.len());
            },
        }
    }
}

/// First serial port belonging to the receiver's USB identity.
fn locate_receiver_port() -> Option<String> {
    let ports = serialport::available_ports().ok()?;

    ports.into_iter().find_map(|port| match &port.port_type {
        SerialPortType::UsbPort(usb) if usb.vid == UBLOX_VID && usb.pid == UBLOX_PID => {
            Some(port.port_name)
        },
        _ => None,
    })
}
