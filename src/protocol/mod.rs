//! Wire format for the Cemuhook DSU (DualShock UDP) protocol: framing,
//! checksums and the handful of message shapes the server understands.
//!
//! A datagram is a 16-byte header (magic, protocol version, payload length,
//! CRC32, server/client id) followed by a 4-byte message type and a
//! message-specific body. [`encode_header`]/[`finalize_datagram`] build the
//! header side; [`parse_header`] and the `parse_*`/`build_*` functions in
//! this module and [`internals`] handle the rest.

pub mod internals;

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Highest protocol version this server understands. Inbound packets
/// declaring a higher version are rejected outright.
pub const MAX_PROTOCOL_VERSION: u16 = 1001;

/// Protocol version stamped on every outbound packet except the explicit
/// version-handshake response, which instead carries [`MAX_PROTOCOL_VERSION`]
/// in its body.
pub const PROTOCOL_VERSION: u16 = 1001;

/// `DSUC_VersionReq` / `DSUS_VersionRsp` message type code.
pub const MESSAGE_TYPE_VERSION: u32 = 0x1_0000_0;
/// `DSUC_ListPorts` / `DSUS_PortInfo` message type code.
pub const MESSAGE_TYPE_LIST_PORTS: u32 = 0x1_0000_1;
/// `DSUC_PadDataReq` / `DSUS_PadDataRsp` message type code.
pub const MESSAGE_TYPE_PAD_DATA: u32 = 0x1_0000_2;

const HEADER_LEN: usize = 16;

/// Which side a datagram originates from — selects the magic bytes used
/// when framing and parsing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Server,
    Client,
}

impl Source {
    fn magic(self) -> &'static [u8; 4] {
        match self {
            Source::Server => b"DSUS",
            Source::Client => b"DSUC",
        }
    }
}

/// Everything a malformed inbound datagram can fail on. Per the taxonomy in
/// the error handling design: any of these causes the datagram to be
/// dropped silently and surfaced on the server's error stream — never a
/// reply.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet shorter than the 16-byte header")]
    Truncated,
    #[error("unrecognized magic string")]
    BadMagic,
    #[error("declared protocol version {got} exceeds maximum {max}")]
    UnsupportedVersion { got: u16, max: u16 },
    #[error("declared payload length {declared} exceeds {available} bytes available")]
    InvalidLength { declared: u16, available: usize },
    #[error("checksum mismatch: header said {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("unrecognized message type {0:#x}")]
    UnknownMessageType(u32),
    #[error("malformed message body: {0}")]
    MalformedBody(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parsed, validated header plus the raw bytes of the message (message type
/// + body, i.e. everything after the 16-byte header).
#[derive(Debug)]
pub struct ParsedHeader<'a> {
    pub protocol_version: u16,
    pub server_id: u32,
    pub body: &'a [u8],
}

fn checksum(packet: &[u8]) -> u32 {
    let mut scratch = packet.to_vec();
    for byte in &mut scratch[8..12] {
        *byte = 0;
    }
    crc32fast::hash(&scratch)
}

/// Writes the 16-byte header prefix with the length and checksum fields
/// zeroed; call [`finalize_datagram`] once the full message has been
/// written to patch both in.
pub fn encode_header(
    writer: &mut Vec<u8>,
    source: Source,
    protocol_version: u16,
    server_id: u32,
) -> std::io::Result<()> {
    writer.write_all(source.magic())?;
    writer.write_u16::<LittleEndian>(protocol_version)?;
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(server_id)
}

/// Patches the payload-length and CRC32 fields of a fully-written datagram.
pub fn finalize_datagram(buf: &mut [u8]) {
    debug_assert!(buf.len() >= HEADER_LEN);
    let length = (buf.len() - HEADER_LEN) as u16;
    buf[6..8].copy_from_slice(&length.to_le_bytes());
    buf[8..12].copy_from_slice(&[0, 0, 0, 0]);
    let crc = crc32fast::hash(buf);
    buf[8..12].copy_from_slice(&crc.to_le_bytes());
}

/// Validates an inbound datagram's magic, version, declared length and
/// checksum, then returns the header fields and a slice over the message
/// (message type + body) that follows it. `max_version` is normally
/// [`MAX_PROTOCOL_VERSION`]; callers that want to probe the
/// version-rejection path with a different ceiling (see
/// `ServerConfig::max_protocol_version`) can override it.
pub fn parse_header<'a>(
    expected: Source,
    packet: &'a [u8],
    max_version: u16,
) -> Result<ParsedHeader<'a>, CodecError> {
    if packet.len() < HEADER_LEN {
        return Err(CodecError::Truncated);
    }

    if &packet[0..4] != expected.magic() {
        return Err(CodecError::BadMagic);
    }

    let mut reader = Cursor::new(&packet[4..]);
    let protocol_version = reader.read_u16::<LittleEndian>()?;
    if protocol_version > max_version {
        return Err(CodecError::UnsupportedVersion {
            got: protocol_version,
            max: max_version,
        });
    }

    let declared_length = reader.read_u16::<LittleEndian>()?;
    let available = packet.len() - HEADER_LEN;
    if declared_length as usize > available {
        return Err(CodecError::InvalidLength {
            declared: declared_length,
            available,
        });
    }

    let checksum_field = reader.read_u32::<LittleEndian>()?;
    let server_id = reader.read_u32::<LittleEndian>()?;

    let computed = checksum(packet);
    if computed != checksum_field {
        return Err(CodecError::ChecksumMismatch {
            expected: checksum_field,
            computed,
        });
    }

    Ok(ParsedHeader {
        protocol_version,
        server_id,
        body: &packet[HEADER_LEN..HEADER_LEN + declared_length as usize],
    })
}

/// Reads the 4-byte message type that leads every message body.
pub fn read_message_type(body: &[u8]) -> Result<u32, CodecError> {
    let mut reader = Cursor::new(body);
    reader
        .read_u32::<LittleEndian>()
        .map_err(CodecError::from)
}

// --- Domain types -----------------------------------------------------

/// Connection/occupancy state of a pad slot, as reported to clients.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    NotConnected,
    Reserved,
    Connected,
}

impl Default for SlotState {
    fn default() -> SlotState {
        SlotState::NotConnected
    }
}

/// How much of a DualShock a controller can emulate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Model {
    NotApplicable,
    PartialGyro,
    FullGyro,
}

impl Default for Model {
    fn default() -> Model {
        Model::NotApplicable
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    NotApplicable,
    Usb,
    Bluetooth,
}

impl Default for ConnectionType {
    fn default() -> ConnectionType {
        ConnectionType::NotApplicable
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatteryStatus {
    NotApplicable,
    Dying,
    Low,
    Medium,
    High,
    Full,
    Charging,
    Charged,
}

impl Default for BatteryStatus {
    fn default() -> BatteryStatus {
        BatteryStatus::NotApplicable
    }
}

/// Identifying/static portion of a controller's state, attached to every
/// outgoing report.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DualShockMeta {
    pub pad_id: u8,
    pub state: SlotState,
    pub model: Model,
    pub connection_type: ConnectionType,
    pub mac_address: [u8; 6],
    pub battery_status: BatteryStatus,
    pub is_active: bool,
}

impl DualShockMeta {
    /// Canonical `"aa:bb:cc:dd:ee:ff"` form, used for logging only — the
    /// internal representation and the registry key stay as raw bytes.
    pub fn mac_address_string(&self) -> String {
        mac_to_string(&self.mac_address)
    }
}

/// One touch point on a pad's trackpad.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TouchPoint {
    pub is_active: bool,
    pub id: u8,
    pub x: u16,
    pub y: u16,
}

/// Digital buttons, named per the DS4 layout the DSU protocol assumes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Buttons {
    pub d_pad_up: bool,
    pub d_pad_down: bool,
    pub d_pad_left: bool,
    pub d_pad_right: bool,
    pub cross: bool,
    pub circle: bool,
    pub square: bool,
    pub triangle: bool,
    pub l1: bool,
    pub r1: bool,
    pub l2: bool,
    pub r2: bool,
    pub l3: bool,
    pub r3: bool,
    pub options: bool,
    pub share: bool,
    pub ps: bool,
    pub touch: bool,
}

/// Per-frame dynamic portion of a controller's state, as produced by the
/// (out of scope) HID decoding layer upstream.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct NormalizedReport {
    pub packet_counter: u32,
    pub buttons: Buttons,
    pub left_stick_x: u8,
    pub left_stick_y: u8,
    pub right_stick_x: u8,
    pub right_stick_y: u8,
    pub trigger_l2: u8,
    pub trigger_r2: u8,
    pub first_touch: TouchPoint,
    pub second_touch: TouchPoint,
    pub motion_timestamp: u64,
    pub accelerometer: [f32; 3],
    pub gyro: [f32; 3],
}

/// What a `DSUC_PadDataReq` asks the server to register the sender for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PadDataRequest {
    pub registration_flags: u8,
    pub pad_id: u8,
    pub mac_address: [u8; 6],
}

impl PadDataRequest {
    pub const FLAG_PAD_ID: u8 = 0b01;
    pub const FLAG_MAC: u8 = 0b10;
}

/// Parses `"aa:bb:cc:dd:ee:ff"` into wire-order bytes. Used only at the
/// logging/display boundary.
pub fn mac_from_str(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for slot in &mut out {
        let part = parts.next()?;
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

pub fn mac_to_string(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

// --- Message parsing/building -----------------------------------------

/// `DSUC_ListPorts` request body: `i32` count followed by that many pad
/// indices.
pub fn parse_list_ports_request(body: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut reader = Cursor::new(body);
    reader.read_u32::<LittleEndian>()?; // message type, already dispatched on

    let count = reader.read_i32::<LittleEndian>()?;
    if !(0..=4).contains(&count) {
        return Err(CodecError::MalformedBody("numOfPadRequests out of range"));
    }

    let mut indices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let index = reader.read_u8()?;
        if index > 3 {
            return Err(CodecError::MalformedBody("pad index out of range"));
        }
        indices.push(index);
    }

    Ok(indices)
}

/// `DSUC_PadDataReq` request body: registration flags, a pad id and a MAC,
/// only the relevant one of which is meaningful depending on the flags.
pub fn parse_pad_data_request(body: &[u8]) -> Result<PadDataRequest, CodecError> {
    let mut reader = Cursor::new(body);
    reader.read_u32::<LittleEndian>()?; // message type

    let registration_flags = reader.read_u8()?;
    let pad_id = reader.read_u8()?;

    let mut mac_address = [0u8; 6];
    reader
        .read_exact(&mut mac_address)
        .map_err(CodecError::from)?;

    Ok(PadDataRequest {
        registration_flags,
        pad_id,
        mac_address,
    })
}

/// Builds the full `DSUS_VersionRsp` datagram: header + message type +
/// `MAX_PROTOCOL_VERSION` widened to a `u32`.
pub fn build_version_response(server_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    encode_header(&mut buf, Source::Server, PROTOCOL_VERSION, server_id).unwrap();
    buf.write_u32::<LittleEndian>(MESSAGE_TYPE_VERSION).unwrap();
    buf.write_u32::<LittleEndian>(MAX_PROTOCOL_VERSION as u32)
        .unwrap();
    finalize_datagram(&mut buf);
    buf
}

/// Builds a full `DSUS_PortInfo` datagram for one pad.
pub fn build_port_info_response(server_id: u32, meta: &DualShockMeta) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    encode_header(&mut buf, Source::Server, PROTOCOL_VERSION, server_id).unwrap();
    buf.write_u32::<LittleEndian>(MESSAGE_TYPE_LIST_PORTS)
        .unwrap();
    internals::encode_meta(&mut buf, meta).unwrap();
    buf.write_u8(0).unwrap(); // trailing reserved byte
    finalize_datagram(&mut buf);
    buf
}

/// Builds the full, exactly-100-byte `DSUS_PadDataRsp` datagram.
pub fn build_pad_data_response(
    server_id: u32,
    meta: &DualShockMeta,
    report: &NormalizedReport,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(100);
    encode_header(&mut buf, Source::Server, PROTOCOL_VERSION, server_id).unwrap();
    buf.write_u32::<LittleEndian>(MESSAGE_TYPE_PAD_DATA)
        .unwrap();
    internals::encode_meta(&mut buf, meta).unwrap();
    buf.write_u8(meta.is_active as u8).unwrap();
    internals::encode_report(&mut buf, report).unwrap();
    finalize_datagram(&mut buf);
    debug_assert_eq!(buf.len(), 100);
    buf
}

/// Parses a full `DSUS_PadDataRsp` datagram back into its meta/report
/// parts. Exposed for round-trip tests and for the reference client.
pub fn parse_pad_data_response(
    packet: &[u8],
) -> Result<(DualShockMeta, NormalizedReport), CodecError> {
    let parsed = parse_header(Source::Server, packet, MAX_PROTOCOL_VERSION)?;
    let message_type = read_message_type(parsed.body)?;
    if message_type != MESSAGE_TYPE_PAD_DATA {
        return Err(CodecError::UnknownMessageType(message_type));
    }

    let mut reader = Cursor::new(&parsed.body[4..]);
    let mut meta = internals::parse_meta(&mut reader)?;
    meta.is_active = reader.read_u8().map_err(CodecError::from)? != 0;
    let report = internals::parse_report(&mut reader)?;
    Ok((meta, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_response_round_trips_through_parse_header() {
        let datagram = build_version_response(0xDEAD_BEEF);
        let parsed = parse_header(Source::Server, &datagram, MAX_PROTOCOL_VERSION).unwrap();
        assert_eq!(parsed.server_id, 0xDEAD_BEEF);
        let message_type = read_message_type(parsed.body).unwrap();
        assert_eq!(message_type, MESSAGE_TYPE_VERSION);

        let max_ver = u32::from_le_bytes(parsed.body[4..8].try_into().unwrap());
        assert_eq!(max_ver, MAX_PROTOCOL_VERSION as u32);
    }

    #[test]
    fn pad_data_response_is_exactly_100_bytes_and_round_trips() {
        let meta = DualShockMeta {
            pad_id: 1,
            state: SlotState::Connected,
            model: Model::FullGyro,
            connection_type: ConnectionType::Bluetooth,
            mac_address: [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01],
            battery_status: BatteryStatus::High,
            is_active: true,
        };
        let report = NormalizedReport {
            packet_counter: 99,
            accelerometer: [0.1, -0.2, 9.8],
            gyro: [1.0, 2.0, 3.0],
            ..Default::default()
        };

        let datagram = build_pad_data_response(7, &meta, &report);
        assert_eq!(datagram.len(), 100);

        let (parsed_meta, parsed_report) = parse_pad_data_response(&datagram).unwrap();
        assert_eq!(parsed_meta, meta);
        assert_eq!(parsed_report.packet_counter, 99);
        assert_eq!(parsed_report.accelerometer, [0.1, -0.2, 9.8]);
        assert_eq!(parsed_report.gyro, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn tampering_with_the_payload_is_caught_by_the_checksum() {
        let mut datagram = build_version_response(1);
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;

        let error = parse_header(Source::Server, &datagram, MAX_PROTOCOL_VERSION).unwrap_err();
        assert!(matches!(error, CodecError::ChecksumMismatch { .. }));
    }

    #[test]
    fn version_above_the_configured_maximum_is_rejected() {
        let datagram = build_version_response(1);
        let error = parse_header(Source::Server, &datagram, 100).unwrap_err();
        assert!(matches!(error, CodecError::UnsupportedVersion { got: 1001, max: 100 }));
    }

    #[test]
    fn truncated_packet_is_rejected_before_touching_the_body() {
        let error = parse_header(Source::Client, &[0u8; 4], MAX_PROTOCOL_VERSION).unwrap_err();
        assert!(matches!(error, CodecError::Truncated));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let datagram = build_version_response(1);
        let error = parse_header(Source::Client, &datagram, MAX_PROTOCOL_VERSION).unwrap_err();
        assert!(matches!(error, CodecError::BadMagic));
    }

    #[test]
    fn mac_string_round_trips() {
        let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        let text = mac_to_string(&mac);
        assert_eq!(text, "00:11:22:33:44:55");
        assert_eq!(mac_from_str(&text), Some(mac));
    }

    #[test]
    fn list_ports_request_rejects_out_of_range_index() {
        let mut body = Vec::new();
        body.extend_from_slice(&MESSAGE_TYPE_LIST_PORTS.to_le_bytes());
        body.extend_from_slice(&1i32.to_le_bytes());
        body.push(9); // only 0..=3 are valid pad indices

        let error = parse_list_ports_request(&body).unwrap_err();
        assert!(matches!(error, CodecError::MalformedBody(_)));
    }
}
