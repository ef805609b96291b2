//! Owns the UDP socket and the recv loop. [`Server`] is the crate's main
//! entry point: construct it with a [`ServerConfig`], `start()` it, wire up
//! controllers with `add_controller`, and drain `errors()` for anything
//! that goes wrong along the way.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use log::{debug, info, warn};
use rand::Rng;

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::protocol::MAX_PROTOCOL_VERSION;
use crate::registry::ClientRegistry;
use crate::slots::{Controller, ControllerSlotTable};

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:26760";
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Construction-time settings for a [`Server`]. All fields have sane
/// defaults; only set what you need to change.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the recv socket binds to on `start()`.
    pub bind_address: SocketAddr,
    /// Fixed server id, or `None` to pick one at random on construction
    /// (matching the upstream server's own startup behaviour).
    pub server_id: Option<u32>,
    /// How long a client subscription survives without a fresh PadData
    /// request before it's treated as gone.
    pub client_timeout: Duration,
    /// Highest protocol version this server accepts from clients. Only
    /// meant to be lowered in tests that exercise version rejection.
    pub max_protocol_version: u16,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_address: DEFAULT_BIND_ADDRESS.parse().unwrap(),
            server_id: None,
            client_timeout: crate::registry::DEFAULT_CLIENT_TIMEOUT,
            max_protocol_version: MAX_PROTOCOL_VERSION,
        }
    }
}

/// A running (or stopped) DSU server. Survives repeated `start()`/`stop()`
/// cycles: the slot table, client registry and controller wiring are all
/// built once at construction and outlive any particular socket.
pub struct Server {
    bind_address: SocketAddr,
    dispatcher: Dispatcher,
    errors_rx: Receiver<ServerError>,
    running: Arc<AtomicBool>,
    recv_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        let server_id = config
            .server_id
            .unwrap_or_else(|| rand::thread_rng().gen());
        let (errors_tx, errors_rx) = unbounded();

        let dispatcher = Dispatcher {
            socket: Arc::new(Mutex::new(None)),
            slots: Arc::new(Mutex::new(ControllerSlotTable::new())),
            registry: Arc::new(Mutex::new(ClientRegistry::new(config.client_timeout))),
            server_id,
            max_protocol_version: config.max_protocol_version,
            errors: errors_tx,
        };

        Server {
            bind_address: config.bind_address,
            dispatcher,
            errors_rx,
            running: Arc::new(AtomicBool::new(false)),
            recv_thread: None,
        }
    }

    /// The id this server reports in its handshake replies. Fixed for the
    /// lifetime of the `Server`, regardless of `start()`/`stop()` cycles.
    pub fn server_id(&self) -> u32 {
        self.dispatcher.server_id
    }

    /// Binds the recv socket and starts the polling loop. Idempotent: a
    /// prior socket (if any) is stopped first, matching the upstream
    /// server's "restart clears old state" behaviour. `address` overrides
    /// the configured bind address for this start, if given.
    pub fn start(&mut self, address: Option<SocketAddr>) -> std::io::Result<()> {
        self.stop();

        let bind_address = address.unwrap_or(self.bind_address);
        let socket = UdpSocket::bind(bind_address)?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        info!("dsu-bridge listening on {}", bind_address);

        let socket = Arc::new(socket);
        *self.dispatcher.socket.lock().unwrap() = Some(socket.clone());

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let dispatcher = self.dispatcher.clone();

        let handle = thread::Builder::new()
            .name("dsu-bridge-recv".to_string())
            .spawn(move || {
                let mut buf = [0u8; 1024];
                while running.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buf) {
                        Ok((n, source_addr)) => {
                            dispatcher.handle_datagram(source_addr, &buf[..n]);
                        }
                        Err(error)
                            if error.kind() == std::io::ErrorKind::WouldBlock
                                || error.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(error) => {
                            warn!("recv error: {}", error);
                            dispatcher.emit_socket_error(error);
                        }
                    }
                }
                debug!("recv loop exiting");
            })
            .expect("failed to spawn recv thread");

        self.recv_thread = Some(handle);
        Ok(())
    }

    /// Stops the recv loop and releases the socket. Safe to call when
    /// already stopped.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
        *self.dispatcher.socket.lock().unwrap() = None;
    }

    /// Installs `controller` in the first free slot, wiring its report and
    /// error streams into the dispatcher. Returns the assigned slot index,
    /// or `None` if all four slots are occupied.
    pub fn add_controller(&self, controller: Box<dyn Controller>) -> Option<usize> {
        let report_dispatcher = self.dispatcher.clone();
        let error_dispatcher = self.dispatcher.clone();

        self.dispatcher.slots.lock().unwrap().add_controller(
            controller,
            move |slot, report| report_dispatcher.handle_report(slot, report),
            move |slot, message| error_dispatcher.forward_controller_error(slot, message),
        )
    }

    /// Clears slot `i`. Any client subscriptions referencing that pad stay
    /// registered; they simply stop receiving data until a new controller
    /// takes the slot.
    pub fn remove_controller(&self, i: usize) {
        self.dispatcher.slots.lock().unwrap().remove_controller(i);
    }

    /// Drops every client registration. Mainly useful for tests.
    pub fn clear_clients(&self) {
        self.dispatcher.registry.lock().unwrap().clear();
    }

    /// Receiver side of the server's non-fatal error stream. Drain this in
    /// a loop (or poll it) to observe malformed datagrams, send failures
    /// and forwarded controller errors.
    pub fn errors(&self) -> &Receiver<ServerError> {
        &self.errors_rx
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
