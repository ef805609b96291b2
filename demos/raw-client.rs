//! Minimal Cemuhook client: sends a version handshake, subscribes to all
//! pads, and prints every pad-data report it receives. Useful for poking at
//! a running server without needing a real game or emulator.

use std::net::UdpSocket;
use std::time::Duration;

use dsu_bridge::protocol::{self as proto, Source};

fn main() {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("failed to bind client socket");
    socket
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    let server_address = "127.0.0.1:26760";

    let mut version_request = Vec::new();
    proto::encode_header(&mut version_request, Source::Client, proto::PROTOCOL_VERSION, 1).unwrap();
    version_request.extend_from_slice(&proto::MESSAGE_TYPE_VERSION.to_le_bytes());
    proto::finalize_datagram(&mut version_request);
    socket.send_to(&version_request, server_address).unwrap();

    let mut buf = [0u8; 128];
    match socket.recv_from(&mut buf) {
        Ok((n, _)) => println!("version handshake reply: {} bytes", n),
        Err(error) => println!("no version reply: {}", error),
    }

    let mut subscribe = Vec::new();
    proto::encode_header(&mut subscribe, Source::Client, proto::PROTOCOL_VERSION, 1).unwrap();
    subscribe.extend_from_slice(&proto::MESSAGE_TYPE_PAD_DATA.to_le_bytes());
    subscribe.push(0); // registration flags: all pads
    subscribe.push(0);
    subscribe.extend_from_slice(&[0u8; 6]);
    proto::finalize_datagram(&mut subscribe);

    loop {
        socket.send_to(&subscribe, server_address).unwrap();

        match socket.recv_from(&mut buf) {
            Ok((n, _)) if n == 100 => match proto::parse_pad_data_response(&buf[..n]) {
                Ok((meta, report)) => println!(
                    "pad {} gyro={:?} accel={:?}",
                    meta.pad_id, report.gyro, report.accelerometer
                ),
                Err(error) => println!("malformed pad-data reply: {}", error),
            },
            Ok((n, _)) => println!("unexpected reply of {} bytes", n),
            Err(error) => println!("no report yet: {}", error),
        }
    }
}
