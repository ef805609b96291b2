//! Classifies incoming datagrams, verifies their checksum (via
//! [`crate::protocol::parse_header`]), routes them to the version/list-ports/
//! pad-data handlers, and fans outgoing pad-data reports out to interested
//! clients. This is the piece that ties the packet codec, client registry
//! and slot table together; [`crate::server::Server`] just owns an instance
//! of it and a socket to drive it with.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, trace, warn};

use crate::error::ServerError;
use crate::protocol::{self, PadDataRequest, Source};
use crate::registry::ClientRegistry;
use crate::slots::ControllerSlotTable;

/// Shared state and wiring behind both the inbound-datagram path and the
/// controller-report fan-out path. Cheap to clone: every field is an `Arc`
/// (or `Copy`), so each forwarding thread gets its own handle onto the same
/// underlying tables.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) socket: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    pub(crate) slots: Arc<Mutex<ControllerSlotTable>>,
    pub(crate) registry: Arc<Mutex<ClientRegistry>>,
    pub(crate) server_id: u32,
    pub(crate) max_protocol_version: u16,
    pub(crate) errors: Sender<ServerError>,
}

impl Dispatcher {
    fn send_to(&self, target: SocketAddr, datagram: &[u8]) {
        let socket = self.socket.lock().unwrap().clone();
        let socket = match socket {
            Some(socket) => socket,
            None => return,
        };

        match socket.send_to(datagram, target) {
            Ok(written) if written == datagram.len() => {}
            Ok(written) => {
                let _ = self.errors.send(ServerError::ShortSend {
                    target,
                    written,
                    expected: datagram.len(),
                });
            }
            Err(source) => {
                let _ = self.errors.send(ServerError::Send { target, source });
            }
        }
    }

    /// Entry point for every datagram the recv loop reads off the socket.
    /// Never replies to, and never panics on, a malformed packet — bad
    /// input is dropped and reported on the error stream.
    pub(crate) fn handle_datagram(&self, source_addr: SocketAddr, packet: &[u8]) {
        let parsed = match protocol::parse_header(Source::Client, packet, self.max_protocol_version)
        {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!("dropping malformed datagram from {}: {}", source_addr, error);
                let _ = self
                    .errors
                    .send(ServerError::MalformedDatagram { source_addr, error });
                return;
            }
        };

        let message_type = match protocol::read_message_type(parsed.body) {
            Ok(message_type) => message_type,
            Err(error) => {
                warn!("dropping datagram from {} with no message type: {}", source_addr, error);
                let _ = self
                    .errors
                    .send(ServerError::MalformedDatagram { source_addr, error });
                return;
            }
        };

        let result = match message_type {
            protocol::MESSAGE_TYPE_VERSION => {
                trace!("version request from {}", source_addr);
                self.handle_version_request(source_addr);
                Ok(())
            }
            protocol::MESSAGE_TYPE_LIST_PORTS => {
                trace!("list-ports request from {}", source_addr);
                self.handle_list_ports_request(source_addr, parsed.body)
            }
            protocol::MESSAGE_TYPE_PAD_DATA => {
                trace!("pad-data request from {}", source_addr);
                self.handle_pad_data_request(source_addr, parsed.body)
            }
            other => Err(protocol::CodecError::UnknownMessageType(other)),
        };

        if let Err(error) = result {
            warn!("dropping malformed datagram from {}: {}", source_addr, error);
            let _ = self
                .errors
                .send(ServerError::MalformedDatagram { source_addr, error });
        }
    }

    fn handle_version_request(&self, source_addr: SocketAddr) {
        let datagram = protocol::build_version_response(self.server_id);
        self.send_to(source_addr, &datagram);
    }

    fn handle_list_ports_request(
        &self,
        source_addr: SocketAddr,
        body: &[u8],
    ) -> Result<(), protocol::CodecError> {
        let indices = protocol::parse_list_ports_request(body)?;

        let slots = self.slots.lock().unwrap();
        for index in indices {
            if !slots.is_occupied(index as usize) {
                continue;
            }
            let meta = match slots.meta(index as usize) {
                Some(meta) => meta,
                None => continue,
            };
            let datagram = protocol::build_port_info_response(self.server_id, &meta);
            self.send_to(source_addr, &datagram);
        }

        Ok(())
    }

    fn handle_pad_data_request(
        &self,
        source_addr: SocketAddr,
        body: &[u8],
    ) -> Result<(), protocol::CodecError> {
        let request = protocol::parse_pad_data_request(body)?;
        let now = Instant::now();

        let mut registry = self.registry.lock().unwrap();
        register_subscription(&mut registry, source_addr, &request, now);
        debug!(
            "{} registered (flags={:#04b}, pad_id={}, mac={})",
            source_addr,
            request.registration_flags,
            request.pad_id,
            protocol::mac_to_string(&request.mac_address)
        );

        Ok(())
    }

    /// Called by a slot's report-forwarding thread for every
    /// [`crate::protocol::NormalizedReport`] the controller in `slot`
    /// emits. Looks up interested clients and sends each of them the
    /// 100-byte pad-data datagram.
    pub(crate) fn handle_report(&self, slot: usize, report: crate::protocol::NormalizedReport) {
        let meta = match self.slots.lock().unwrap().meta(slot) {
            Some(meta) => meta,
            None => return,
        };

        let now = Instant::now();
        let targets = self.registry.lock().unwrap().clients_for(&meta, now);
        if targets.is_empty() {
            return;
        }

        let datagram = protocol::build_pad_data_response(self.server_id, &meta, &report);
        for target in targets {
            self.send_to(target, &datagram);
        }
    }

    /// Called by a slot's error-forwarding thread; upstream controller
    /// errors are forwarded verbatim.
    pub(crate) fn forward_controller_error(&self, slot: usize, message: String) {
        let _ = self.errors.send(ServerError::Controller { slot, message });
    }

    pub(crate) fn emit_socket_error(&self, error: std::io::Error) {
        let _ = self.errors.send(ServerError::Socket(error));
    }
}

fn register_subscription(
    registry: &mut ClientRegistry,
    endpoint: SocketAddr,
    request: &PadDataRequest,
    now: Instant,
) {
    let flags = request.registration_flags;
    if flags == 0 {
        registry.register_all_pads(endpoint, now);
        return;
    }

    if flags & PadDataRequest::FLAG_PAD_ID != 0 {
        registry.register_by_pad_id(endpoint, request.pad_id, now);
    }
    if flags & PadDataRequest::FLAG_MAC != 0 {
        registry.register_by_mac(endpoint, request.mac_address, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self as proto, ConnectionType, DualShockMeta, Model, NormalizedReport, SlotState};
    use crossbeam_channel::unbounded;
    use std::net::Ipv4Addr;

    fn test_dispatcher() -> (Dispatcher, crossbeam_channel::Receiver<ServerError>, UdpSocket, SocketAddr) {
        let server_socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        server_socket.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let (errors_tx, errors_rx) = unbounded();

        let dispatcher = Dispatcher {
            socket: Arc::new(Mutex::new(Some(Arc::new(server_socket)))),
            slots: Arc::new(Mutex::new(ControllerSlotTable::new())),
            registry: Arc::new(Mutex::new(ClientRegistry::new(Duration::from_secs(5)))),
            server_id: 0x1234_5678,
            max_protocol_version: proto::MAX_PROTOCOL_VERSION,
            errors: errors_tx,
        };

        let client_socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        client_socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let client_addr = client_socket.local_addr().unwrap();

        (dispatcher, errors_rx, client_socket, client_addr)
    }

    fn build_request(msg_type: u32, body: &[u8], server_id: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        proto::encode_header(&mut buf, proto::Source::Client, proto::PROTOCOL_VERSION, server_id).unwrap();
        buf.extend_from_slice(&msg_type.to_le_bytes());
        buf.extend_from_slice(body);
        proto::finalize_datagram(&mut buf);
        buf
    }

    #[test]
    fn version_request_gets_a_version_reply() {
        let (dispatcher, _errors, client_socket, client_addr) = test_dispatcher();

        let request = build_request(proto::MESSAGE_TYPE_VERSION, &[], 0xAAAA_BBBB);
        dispatcher.handle_datagram(client_addr, &request);

        let mut buf = [0u8; 64];
        let (n, _) = client_socket.recv_from(&mut buf).unwrap();
        let reply = &buf[..n];

        assert_eq!(&reply[0..4], b"DSUS");
        let msg_type = u32::from_le_bytes(reply[16..20].try_into().unwrap());
        assert_eq!(msg_type, proto::MESSAGE_TYPE_VERSION);
        let max_ver = u32::from_le_bytes(reply[20..24].try_into().unwrap());
        assert_eq!(max_ver, proto::MAX_PROTOCOL_VERSION as u32);
    }

    #[test]
    fn list_ports_on_empty_slot_yields_no_reply() {
        let (dispatcher, _errors, client_socket, client_addr) = test_dispatcher();

        let body = {
            let mut b = Vec::new();
            b.extend_from_slice(&1i32.to_le_bytes());
            b.push(0);
            b
        };
        let request = build_request(proto::MESSAGE_TYPE_LIST_PORTS, &body, 1);
        dispatcher.handle_datagram(client_addr, &request);

        let mut buf = [0u8; 64];
        assert!(client_socket.recv_from(&mut buf).is_err());
    }

    #[test]
    fn list_ports_on_occupied_slot_reports_its_mac() {
        let (dispatcher, _errors, client_socket, client_addr) = test_dispatcher();

        {
            let mut slots = dispatcher.slots.lock().unwrap();
            let controller = crate::slots::tests_support::stub_with_meta(DualShockMeta {
                pad_id: 2,
                state: SlotState::Connected,
                model: Model::FullGyro,
                connection_type: ConnectionType::Usb,
                mac_address: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
                battery_status: crate::protocol::BatteryStatus::Full,
                is_active: true,
            });
            slots.add_controller(controller, |_, _| {}, |_, _| {});
        }

        let body = {
            let mut b = Vec::new();
            b.extend_from_slice(&1i32.to_le_bytes());
            b.push(2);
            b
        };
        let request = build_request(proto::MESSAGE_TYPE_LIST_PORTS, &body, 1);
        dispatcher.handle_datagram(client_addr, &request);

        let mut buf = [0u8; 64];
        let (n, _) = client_socket.recv_from(&mut buf).unwrap();
        let reply = &buf[..n];
        assert_eq!(&reply[24..30], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    }

    #[test]
    fn corrupted_checksum_is_dropped_with_no_reply() {
        let (dispatcher, errors, client_socket, client_addr) = test_dispatcher();

        let mut request = build_request(proto::MESSAGE_TYPE_VERSION, &[], 1);
        request[20] ^= 0xFF; // flip a byte well outside the checksum field
        dispatcher.handle_datagram(client_addr, &request);

        let mut buf = [0u8; 64];
        assert!(client_socket.recv_from(&mut buf).is_err());
        assert!(errors.try_recv().is_ok());
    }

    #[test]
    fn pad_data_fan_out_reaches_subscribed_client() {
        let (dispatcher, _errors, client_socket, client_addr) = test_dispatcher();

        let body = {
            let mut b = Vec::new();
            b.push(0); // flags = 0 => all pads
            b.push(0);
            b.extend_from_slice(&[0u8; 6]);
            b
        };
        let request = build_request(proto::MESSAGE_TYPE_PAD_DATA, &body, 1);
        dispatcher.handle_datagram(client_addr, &request);

        {
            let mut slots = dispatcher.slots.lock().unwrap();
            let controller = crate::slots::tests_support::stub_with_meta(DualShockMeta {
                pad_id: 1,
                state: SlotState::Connected,
                ..Default::default()
            });
            slots.add_controller(controller, |_, _| {}, |_, _| {});
        }

        dispatcher.handle_report(1, NormalizedReport::default());

        let mut buf = [0u8; 128];
        let (n, _) = client_socket.recv_from(&mut buf).unwrap();
        assert_eq!(n, 100);
    }
}
