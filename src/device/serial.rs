//! Serial device transport: a GNSS receiver on a tty (e.g. `/dev/ttyUSB0`).
//!
//! The port is opened read+write and configured raw 8N1 via termios.  The
//! read side runs on a blocking thread so it never stalls the async
//! runtime; bytes are forwarded untouched — NMEA framing happens in the
//! parser, not here.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
};
use tokio::sync::mpsc;

use crate::error::{Result, RtkError};

use super::{serial_priority, ConnectOptions, DeviceEvent, DeviceTransport};

pub struct SerialTransport {
    device: String,
    baud:   u32,
    /// Write half; a duplicated fd feeds the blocking reader.
    file:   Option<fs::File>,
    stop:   Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(device: impl Into<String>, baud: u32) -> Self {
        Self {
            device: device.into(),
            baud,
            file: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl DeviceTransport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn is_available(&self) -> bool {
        Path::new(&self.device).exists()
    }

    fn priority(&self, opts: &ConnectOptions) -> i32 {
        serial_priority(opts)
    }

    fn connect(
        &mut self,
        _opts:  &ConnectOptions,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<()> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)?;
        configure_serial(&file, self.baud)?;

        let reader = file.try_clone()?;
        // Fresh flag per connection so a stale reader from an earlier
        // session cannot be revived by reconnecting.
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let device = self.device.clone();

        tokio::task::spawn_blocking(move || reader_loop(reader, &device, stop, events));

        self.file = Some(file);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.file = None;
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.file {
            Some(f) => {
                f.write_all(bytes)?;
                Ok(())
            }
            None => Err(RtkError::Transport("serial port not connected".into())),
        }
    }
}

fn reader_loop(
    mut file: fs::File,
    device:   &str,
    stop:     Arc<AtomicBool>,
    events:   mpsc::UnboundedSender<DeviceEvent>,
) {
    let mut buf = [0u8; 512];
    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("serial reader on {device} stopped");
            return;
        }
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if events.send(DeviceEvent::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("serial read error on {device}: {e}");
                break;
            }
        }
    }
    // Only an unrequested loss of the link counts as a disconnect.
    if !stop.load(Ordering::SeqCst) {
        let _ = events.send(DeviceEvent::Disconnected { name: "serial" });
    }
}

/// Configure the port for raw byte traffic (8N1, no echo, no signals).
fn configure_serial(file: &fs::File, baud: u32) -> Result<()> {
    let mut t = termios::tcgetattr(file)
        .map_err(|e| RtkError::Transport(format!("tcgetattr: {e}")))?;

    // Raw input: no canonical mode, no echo, no signals
    t.local_flags &= !(
        LocalFlags::ICANON |
        LocalFlags::ECHO   |
        LocalFlags::ECHOE  |
        LocalFlags::ISIG
    );
    // No output processing (RTCM bytes must pass through untouched)
    t.output_flags &= !OutputFlags::OPOST;
    // Disable software flow control and strip/parity
    t.input_flags &= !(
        InputFlags::IXON   |
        InputFlags::IXOFF  |
        InputFlags::IXANY  |
        InputFlags::ISTRIP |
        InputFlags::INPCK
    );
    // 8 data bits, no parity, 1 stop bit, enable receiver, ignore modem ctrl
    t.control_flags |= ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CLOCAL;
    t.control_flags &= !(ControlFlags::CSIZE | ControlFlags::CSTOPB | ControlFlags::PARENB);

    // VMIN=1, VTIME=0: blocking read of at least 1 byte
    t.control_chars[termios::SpecialCharacterIndices::VMIN as usize] = 1;
    t.control_chars[termios::SpecialCharacterIndices::VTIME as usize] = 0;

    let baud_rate = match baud {
        4800   => BaudRate::B4800,
        9600   => BaudRate::B9600,
        19200  => BaudRate::B19200,
        38400  => BaudRate::B38400,
        57600  => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        other  => {
            warn!("unsupported baud rate {other}, falling back to 9600");
            BaudRate::B9600
        }
    };

    termios::cfsetospeed(&mut t, baud_rate)
        .map_err(|e| RtkError::Transport(format!("cfsetospeed: {e}")))?;
    termios::cfsetispeed(&mut t, baud_rate)
        .map_err(|e| RtkError::Transport(format!("cfsetispeed: {e}")))?;
    termios::tcsetattr(file, SetArg::TCSANOW, &t)
        .map_err(|e| RtkError::Transport(format!("tcsetattr: {e}")))?;

    Ok(())
}
