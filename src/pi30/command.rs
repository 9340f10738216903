use crate::prelude::*;

use serde::Serialize;

/// Carriage return closing every PI30 frame, in both directions.
pub const TERMINATOR: u8 = 0x0D;

// Precomputed query frames: wire name, CRC16/XMODEM (big endian), CR.
const QPIGS_FRAME: &[u8] = &[0x51, 0x50, 0x49, 0x47, 0x53, 0xb7, 0xa9, 0x0d];
const QPIGS2_FRAME: &[u8] = &[0x51, 0x50, 0x49, 0x47, 0x53, 0x32, 0x68, 0x2d, 0x0d];
const QPIWS_FRAME: &[u8] = &[0x51, 0x50, 0x49, 0x57, 0x53, 0xb4, 0xda, 0x0d];
// "QMOD" + 0x49c1. The trailing 'I' of the catalog name is the CRC high byte.
const QMODI_FRAME: &[u8] = &[0x51, 0x4d, 0x4f, 0x44, 0x49, 0xc1, 0x0d];
const QPIRI_FRAME: &[u8] = &[0x51, 0x50, 0x49, 0x52, 0x49, 0xf8, 0x54, 0x0d];

/// The read-only queries this bridge issues each poll cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Command {
    /// General status: grid, output, battery and PV1 measurements.
    Qpigs,
    /// Second MPPT tracker measurements.
    Qpigs2,
    /// Warning and fault bit array.
    Qpiws,
    /// Working mode.
    Qmodi,
    /// Rated information (battery thresholds and charge currents).
    Qpiri,
}

impl Command {
    /// Poll order used by a cycle.
    pub const ALL: [Command; 5] = [
        Command::Qpigs,
        Command::Qpigs2,
        Command::Qmodi,
        Command::Qpiws,
        Command::Qpiri,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Qpigs => "QPIGS",
            Command::Qpigs2 => "QPIGS2",
            Command::Qpiws => "QPIWS",
            Command::Qmodi => "QMODI",
            Command::Qpiri => "QPIRI",
        }
    }

    /// ASCII command as it goes on the wire, before the CRC.
    pub fn wire_name(self) -> &'static str {
        match self {
            Command::Qmodi => "QMOD",
            other => other.name(),
        }
    }

    pub fn frame(self) -> &'static [u8] {
        build_frame(self)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QPIGS" => Ok(Command::Qpigs),
            "QPIGS2" => Ok(Command::Qpigs2),
            "QPIWS" => Ok(Command::Qpiws),
            "QMODI" => Ok(Command::Qmodi),
            "QPIRI" => Ok(Command::Qpiri),
            _ => bail!("unknown PI30 query command: {}", s),
        }
    }
}

/// Returns the outgoing frame for `command`. Frames are constants; nothing is
/// computed at send time.
pub fn build_frame(command: Command) -> &'static [u8] {
    match command {
        Command::Qpigs => QPIGS_FRAME,
        Command::Qpigs2 => QPIGS2_FRAME,
        Command::Qpiws => QPIWS_FRAME,
        Command::Qmodi => QMODI_FRAME,
        Command::Qpiri => QPIRI_FRAME,
    }
}

/// PI30 frame checksum: CRC16/XMODEM, big endian, with any byte that would
/// collide with `(`, CR or LF bumped by one.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let mut crc = crc16::State::<crc16::XMODEM>::calculate(data).to_be_bytes();
    for byte in crc.iter_mut() {
        if matches!(*byte, 0x28 | 0x0d | 0x0a) {
            *byte += 1;
        }
    }
    crc
}

/// Strips the CR terminator and, when it verifies, the CRC of an inbound
/// frame. Frames whose last two bytes are not a valid CRC are left intact.
/// Leading whitespace is kept but does not count towards the CRC.
pub fn strip_trailer(input: &[u8]) -> &[u8] {
    let mut frame = input;
    while let Some((&last, rest)) = frame.split_last() {
        if last == TERMINATOR || last == b'\n' {
            frame = rest;
        } else {
            break;
        }
    }

    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let content = &frame[start..];

    if content.len() > 3 && content[0] == b'(' {
        let (body, crc) = content.split_at(content.len() - 2);
        if checksum(body) == crc {
            return &frame[..frame.len() - 2];
        }
    }

    frame
}
