//! Field-level encode/decode helpers backing [`super::build_pad_data_response`]
//! and friends. Kept separate from `mod.rs` so the wire-level plumbing
//! doesn't clutter the public message shapes.

use std::io::{Cursor, Read, Result as IoResult, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    BatteryStatus, Buttons, CodecError, ConnectionType, DualShockMeta, Model, NormalizedReport,
    SlotState, TouchPoint,
};

fn invalid(message: &'static str) -> CodecError {
    CodecError::MalformedBody(message)
}

fn bits_to_byte(bits: [bool; 8]) -> u8 {
    let mut result = 0u8;
    for (i, &bit) in bits.iter().enumerate() {
        result |= (bit as u8) << (7 - i);
    }
    result
}

fn byte_to_bits(byte: u8) -> [bool; 8] {
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte & (1 << (7 - i))) != 0;
    }
    bits
}

fn flag(pressed: bool) -> u8 {
    if pressed {
        0xFF
    } else {
        0x00
    }
}

/// Writes the 11-byte pad/model/connection/MAC/battery prefix shared by the
/// `DSUS_PortInfo` and `DSUS_PadDataRsp` bodies. `isActive` and anything
/// that follows is message-specific and written by the caller.
pub fn encode_meta(writer: &mut Vec<u8>, meta: &DualShockMeta) -> IoResult<()> {
    writer.write_u8(meta.pad_id)?;

    writer.write_u8(match meta.state {
        SlotState::NotConnected => 0,
        SlotState::Reserved => 1,
        SlotState::Connected => 2,
    })?;

    writer.write_u8(match meta.model {
        Model::NotApplicable => 0,
        Model::PartialGyro => 1,
        Model::FullGyro => 2,
    })?;

    writer.write_u8(match meta.connection_type {
        ConnectionType::NotApplicable => 0,
        ConnectionType::Usb => 1,
        ConnectionType::Bluetooth => 2,
    })?;

    writer.write_all(&meta.mac_address)?;

    writer.write_u8(match meta.battery_status {
        BatteryStatus::NotApplicable => 0x00,
        BatteryStatus::Dying => 0x01,
        BatteryStatus::Low => 0x02,
        BatteryStatus::Medium => 0x03,
        BatteryStatus::High => 0x04,
        BatteryStatus::Full => 0x05,
        BatteryStatus::Charging => 0xEE,
        BatteryStatus::Charged => 0xEF,
    })
}

pub fn parse_meta(reader: &mut Cursor<&[u8]>) -> Result<DualShockMeta, CodecError> {
    let pad_id = reader.read_u8()?;
    if pad_id > 3 {
        return Err(invalid("pad id out of range"));
    }

    let state = match reader.read_u8()? {
        0 => SlotState::NotConnected,
        1 => SlotState::Reserved,
        2 => SlotState::Connected,
        _ => return Err(invalid("invalid slot state")),
    };

    let model = match reader.read_u8()? {
        0 => Model::NotApplicable,
        1 => Model::PartialGyro,
        2 => Model::FullGyro,
        _ => return Err(invalid("invalid model")),
    };

    let connection_type = match reader.read_u8()? {
        0 => ConnectionType::NotApplicable,
        1 => ConnectionType::Usb,
        2 => ConnectionType::Bluetooth,
        _ => return Err(invalid("invalid connection type")),
    };

    let mut mac_address = [0u8; 6];
    reader.read_exact(&mut mac_address)?;

    let battery_status = match reader.read_u8()? {
        0x00 => BatteryStatus::NotApplicable,
        0x01 => BatteryStatus::Dying,
        0x02 => BatteryStatus::Low,
        0x03 => BatteryStatus::Medium,
        0x04 => BatteryStatus::High,
        0x05 => BatteryStatus::Full,
        0xEE => BatteryStatus::Charging,
        0xEF => BatteryStatus::Charged,
        _ => return Err(invalid("invalid battery status")),
    };

    Ok(DualShockMeta {
        pad_id,
        state,
        model,
        connection_type,
        mac_address,
        battery_status,
        is_active: false,
    })
}

fn encode_touch(writer: &mut Vec<u8>, touch: TouchPoint) -> IoResult<()> {
    writer.write_u8(touch.is_active as u8)?;
    writer.write_u8(touch.id)?;
    writer.write_u16::<LittleEndian>(touch.x)?;
    writer.write_u16::<LittleEndian>(touch.y)
}

fn parse_touch(reader: &mut Cursor<&[u8]>) -> Result<TouchPoint, CodecError> {
    let is_active = match reader.read_u8()? {
        0 => false,
        1 => true,
        _ => return Err(invalid("invalid touch active flag")),
    };
    let id = reader.read_u8()?;
    let x = reader.read_u16::<LittleEndian>()?;
    let y = reader.read_u16::<LittleEndian>()?;
    Ok(TouchPoint { is_active, id, x, y })
}

/// Writes everything from `packetCounter` (offset 32) through the final
/// gyro Z float (offset 99) of a `DSUS_PadDataRsp` body. `isActive` at
/// offset 31 is the caller's responsibility, shared as it is with the
/// `DSUS_PortInfo` body that has no report to follow it.
pub fn encode_report(writer: &mut Vec<u8>, report: &NormalizedReport) -> IoResult<()> {
    let b = &report.buttons;

    writer.write_u32::<LittleEndian>(report.packet_counter)?;

    writer.write_u8(bits_to_byte([
        b.d_pad_left,
        b.d_pad_down,
        b.d_pad_right,
        b.d_pad_up,
        b.options,
        b.r3,
        b.l3,
        b.share,
    ]))?;

    writer.write_u8(bits_to_byte([
        b.square, b.cross, b.circle, b.triangle, b.r1, b.l1, b.r2, b.l2,
    ]))?;

    writer.write_u8(b.ps as u8)?;
    writer.write_u8(b.touch as u8)?;

    writer.write_u8(report.left_stick_x)?;
    writer.write_u8(report.left_stick_y)?;
    writer.write_u8(report.right_stick_x)?;
    writer.write_u8(report.right_stick_y)?;

    writer.write_u8(flag(b.d_pad_left))?;
    writer.write_u8(flag(b.d_pad_down))?;
    writer.write_u8(flag(b.d_pad_right))?;
    writer.write_u8(flag(b.d_pad_up))?;

    writer.write_u8(flag(b.square))?;
    writer.write_u8(flag(b.cross))?;
    writer.write_u8(flag(b.circle))?;
    writer.write_u8(flag(b.triangle))?;

    writer.write_u8(flag(b.r1))?;
    writer.write_u8(flag(b.l1))?;

    writer.write_u8(report.trigger_r2)?;
    writer.write_u8(report.trigger_l2)?;

    encode_touch(writer, report.first_touch)?;
    encode_touch(writer, report.second_touch)?;

    writer.write_u32::<LittleEndian>(report.motion_timestamp as u32)?;
    writer.write_u32::<LittleEndian>((report.motion_timestamp >> 32) as u32)?;

    writer.write_f32::<LittleEndian>(report.accelerometer[0])?;
    writer.write_f32::<LittleEndian>(report.accelerometer[1])?;
    writer.write_f32::<LittleEndian>(report.accelerometer[2])?;

    writer.write_f32::<LittleEndian>(report.gyro[0])?;
    writer.write_f32::<LittleEndian>(report.gyro[1])?;
    writer.write_f32::<LittleEndian>(report.gyro[2])
}

pub fn parse_report(reader: &mut Cursor<&[u8]>) -> Result<NormalizedReport, CodecError> {
    let packet_counter = reader.read_u32::<LittleEndian>()?;

    let bitmap_a = byte_to_bits(reader.read_u8()?);
    let (d_pad_left, d_pad_down, d_pad_right, d_pad_up, options, r3, l3, share) = (
        bitmap_a[0],
        bitmap_a[1],
        bitmap_a[2],
        bitmap_a[3],
        bitmap_a[4],
        bitmap_a[5],
        bitmap_a[6],
        bitmap_a[7],
    );

    let bitmap_b = byte_to_bits(reader.read_u8()?);
    let (square, cross, circle, triangle, r1, l1, r2, l2) = (
        bitmap_b[0],
        bitmap_b[1],
        bitmap_b[2],
        bitmap_b[3],
        bitmap_b[4],
        bitmap_b[5],
        bitmap_b[6],
        bitmap_b[7],
    );

    let ps = reader.read_u8()? != 0;
    let touch = reader.read_u8()? != 0;

    let left_stick_x = reader.read_u8()?;
    let left_stick_y = reader.read_u8()?;
    let right_stick_x = reader.read_u8()?;
    let right_stick_y = reader.read_u8()?;

    // Analog dpad/face/shoulder bytes are a derived view of the digital
    // bitmaps above (0xFF/0x00); the round trip only needs to consume them.
    for _ in 0..10 {
        reader.read_u8()?;
    }

    let trigger_r2 = reader.read_u8()?;
    let trigger_l2 = reader.read_u8()?;

    let first_touch = parse_touch(reader)?;
    let second_touch = parse_touch(reader)?;

    let low = reader.read_u32::<LittleEndian>()? as u64;
    let high = reader.read_u32::<LittleEndian>()? as u64;
    let motion_timestamp = low | (high << 32);

    let accelerometer = [
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ];

    let gyro = [
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ];

    Ok(NormalizedReport {
        packet_counter,
        buttons: Buttons {
            d_pad_up,
            d_pad_down,
            d_pad_left,
            d_pad_right,
            cross,
            circle,
            square,
            triangle,
            l1,
            r1,
            l2,
            r2,
            l3,
            r3,
            options,
            share,
            ps,
            touch,
        },
        left_stick_x,
        left_stick_y,
        right_stick_x,
        right_stick_y,
        trigger_l2,
        trigger_r2,
        first_touch,
        second_touch,
        motion_timestamp,
        accelerometer,
        gyro,
    })
}
