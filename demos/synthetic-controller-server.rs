//! Runs a server with one synthetic controller wiggling its gyro in slot 0,
//! for exercising the server against real Cemuhook clients without needing
//! actual gamepad hardware wired up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use dsu_bridge::protocol::{
    BatteryStatus, ConnectionType, DualShockMeta, Model, NormalizedReport, SlotState,
};
use dsu_bridge::{Controller, Server, ServerConfig};

struct SyntheticController {
    meta: Mutex<DualShockMeta>,
    last_report: Mutex<Option<NormalizedReport>>,
    reports_tx: Sender<NormalizedReport>,
    reports_rx: Receiver<NormalizedReport>,
    errors_rx: Receiver<String>,
}

impl SyntheticController {
    fn new() -> SyntheticController {
        let (reports_tx, reports_rx) = unbounded();
        let (_errors_tx, errors_rx) = unbounded();
        let meta = DualShockMeta {
            pad_id: 0,
            state: SlotState::Connected,
            model: Model::FullGyro,
            connection_type: ConnectionType::Usb,
            mac_address: [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00],
            battery_status: BatteryStatus::Full,
            is_active: true,
        };
        SyntheticController {
            meta: Mutex::new(meta),
            last_report: Mutex::new(None),
            reports_tx,
            reports_rx,
            errors_rx,
        }
    }

    fn push(&self, report: NormalizedReport) {
        *self.last_report.lock().unwrap() = Some(report);
        let _ = self.reports_tx.send(report);
    }
}

impl Controller for SyntheticController {
    fn subscribe_reports(&self) -> Receiver<NormalizedReport> {
        self.reports_rx.clone()
    }

    fn subscribe_errors(&self) -> Receiver<String> {
        self.errors_rx.clone()
    }

    fn dual_shock_meta(&self) -> Option<DualShockMeta> {
        Some(*self.meta.lock().unwrap())
    }

    fn dual_shock_report(&self) -> Option<NormalizedReport> {
        *self.last_report.lock().unwrap()
    }
}

fn main() {
    env_logger::init();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let mut server = Server::new(ServerConfig::default());
    server.start(None).expect("failed to bind server socket");
    println!("listening with server id {:#010x}", server.server_id());

    let controller = Arc::new(SyntheticController::new());
    let slot = server
        .add_controller(Box::new(SyntheticControllerHandle(controller.clone())))
        .expect("all four slots occupied");
    println!("synthetic controller assigned to slot {}", slot);

    let start = Instant::now();
    let mut counter = 0u32;
    while running.load(Ordering::SeqCst) {
        let elapsed = start.elapsed().as_secs_f32();
        counter += 1;

        controller.push(NormalizedReport {
            packet_counter: counter,
            gyro: [elapsed.sin() * 2.0, elapsed.cos() * 2.0, 0.0],
            accelerometer: [0.0, 0.0, 1.0],
            motion_timestamp: start.elapsed().as_micros() as u64,
            ..Default::default()
        });

        for error in server.errors().try_iter() {
            eprintln!("server error: {}", error);
        }

        thread::sleep(Duration::from_millis(16));
    }

    server.stop();
}

/// `Controller` requires `Send`; a plain `Arc<SyntheticController>` doesn't
/// implement the trait itself (traits on `Arc<T>` need a local wrapper type
/// under Rust's orphan rules), so this thin handle forwards to it.
struct SyntheticControllerHandle(Arc<SyntheticController>);

impl Controller for SyntheticControllerHandle {
    fn subscribe_reports(&self) -> Receiver<NormalizedReport> {
        self.0.subscribe_reports()
    }

    fn subscribe_errors(&self) -> Receiver<String> {
        self.0.subscribe_errors()
    }

    fn dual_shock_meta(&self) -> Option<DualShockMeta> {
        self.0.dual_shock_meta()
    }

    fn dual_shock_report(&self) -> Option<NormalizedReport> {
        self.0.dual_shock_report()
    }
}
