//! Length-prefixed binary wire framing (spec.md §4.G). Little-endian
//! throughout. Receivers always read the `cmdType` tag first; an
//! unrecognized tag closes the connection rather than attempting to
//! resynchronize (spec.md's "Unknown-command recovery" design note).

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::lpx_image::LPXImage;
use crate::scan_tables::ScanTablesHandle;

pub const FRAME_CMD: u32 = 0x01;
pub const COMMAND_CMD: u32 = 0x02;

/// A steering command: `deltaX`, `deltaY`, `stepSize`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringCommand {
    pub delta_x: f32,
    pub delta_y: f32,
    pub step_size: f32,
}

/// Reads the 4-byte `cmdType` tag without consuming anything else.
pub fn read_cmd_type(mut r: impl Read) -> Result<u32> {
    r.read_u32::<LittleEndian>().map_err(Error::Io)
}

pub fn write_frame(mut w: impl Write, image: &LPXImage) -> Result<()> {
    w.write_u32::<LittleEndian>(FRAME_CMD)?;
    image.write_body(w)
}

/// Reads a frame body after the caller has already consumed and checked the
/// `cmdType` tag via [`read_cmd_type`].
pub fn read_frame_tail(tables: ScanTablesHandle, r: impl Read) -> Result<LPXImage> {
    LPXImage::read_body(tables, r)
}

/// Reads a full frame, including the `cmdType` tag, failing with
/// [`Error::Protocol`] if it isn't `FRAME_CMD`.
pub fn read_frame(tables: ScanTablesHandle, mut r: impl Read) -> Result<LPXImage> {
    let cmd = read_cmd_type(&mut r)?;
    if cmd != FRAME_CMD {
        return Err(Error::Protocol(format!("expected frame (0x01), got {cmd:#x}")));
    }
    read_frame_tail(tables, r)
}

pub fn write_command(mut w: impl Write, cmd: SteeringCommand) -> Result<()> {
    w.write_u32::<LittleEndian>(COMMAND_CMD)?;
    w.write_f32::<LittleEndian>(cmd.delta_x)?;
    w.write_f32::<LittleEndian>(cmd.delta_y)?;
    w.write_f32::<LittleEndian>(cmd.step_size)?;
    Ok(())
}

/// Reads a command body after the caller has already consumed and checked
/// the `cmdType` tag via [`read_cmd_type`].
pub fn read_command_tail(mut r: impl Read) -> Result<SteeringCommand> {
    let delta_x = r.read_f32::<LittleEndian>()?;
    let delta_y = r.read_f32::<LittleEndian>()?;
    let step_size = r.read_f32::<LittleEndian>()?;
    Ok(SteeringCommand { delta_x, delta_y, step_size })
}

pub fn read_command(mut r: impl Read) -> Result<SteeringCommand> {
    let cmd = read_cmd_type(&mut r)?;
    if cmd != COMMAND_CMD {
        return Err(Error::Protocol(format!("expected command (0x02), got {cmd:#x}")));
    }
    read_command_tail(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_tables::ScanTables;

    #[test]
    fn command_round_trips() {
        let cmd = SteeringCommand { delta_x: 1.5, delta_y: -2.25, step_size: 4.0 };
        let mut buf = Vec::new();
        write_command(&mut buf, cmd).unwrap();
        let parsed = read_command(&buf[..]).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn frame_round_trips() {
        let tables = ScanTables::synthesize(16, 12.0, 1);
        let image = LPXImage::new_empty(tables.clone(), 16, 16);
        let mut buf = Vec::new();
        write_frame(&mut buf, &image).unwrap();
        let parsed = read_frame(tables, &buf[..]).unwrap();
        assert_eq!(parsed.cell_array(), image.cell_array());
    }

    #[test]
    fn unknown_command_type_is_a_protocol_error() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(0xFF).unwrap();
        assert!(matches!(read_command(&buf[..]), Err(Error::Protocol(_))));
    }
}
