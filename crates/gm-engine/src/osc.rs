//! OSC control surface
//!
//! [`OscControl`] implements the [`ControlSurface`] contract over UDP
//! with `rosc`: messages go out to the configured target, a receiver
//! thread decodes incoming packets and fans them out to event callbacks.
//! Query replies are matched by address against pending queries before
//! regular event dispatch.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};

use gm_core::{EngineError, EngineResult};

use crate::control::{
    ControlArg, ControlCallbackId, ControlEventCallback, ControlQueryCallback, ControlSurface,
};

const RECV_BUF_LEN: usize = 8192;

fn to_osc_args(args: &[ControlArg]) -> Vec<OscType> {
    args.iter()
        .map(|arg| match arg {
            ControlArg::Int(v) => OscType::Int(*v),
            ControlArg::Float(v) => OscType::Float(*v),
            ControlArg::Str(v) => OscType::String(v.clone()),
        })
        .collect()
}

fn from_osc_args(args: Vec<OscType>) -> Vec<ControlArg> {
    args.into_iter()
        .filter_map(|arg| match arg {
            OscType::Int(v) => Some(ControlArg::Int(v)),
            OscType::Long(v) => Some(ControlArg::Int(v as i32)),
            OscType::Float(v) => Some(ControlArg::Float(v)),
            OscType::Double(v) => Some(ControlArg::Float(v as f32)),
            OscType::String(v) => Some(ControlArg::Str(v)),
            // Blobs, time tags etc. have no mixer-control meaning here.
            _ => None,
        })
        .collect()
}

struct Shared {
    callbacks: RwLock<Vec<(u64, ControlEventCallback)>>,
    pending_queries: Mutex<Vec<(String, ControlQueryCallback)>>,
}

impl Shared {
    fn handle_message(&self, message: OscMessage) {
        let args = from_osc_args(message.args);

        // A reply to an outstanding query wins over event dispatch.
        let query = {
            let mut pending = self.pending_queries.lock();
            pending
                .iter()
                .position(|(addr, _)| *addr == message.addr)
                .map(|idx| pending.swap_remove(idx).1)
        };
        if let Some(callback) = query {
            callback(true, args);
            return;
        }

        for (_, callback) in self.callbacks.read().iter() {
            callback(&message.addr, &args);
        }
    }

    fn handle_packet(&self, packet: OscPacket) {
        match packet {
            OscPacket::Message(message) => self.handle_message(message),
            OscPacket::Bundle(bundle) => {
                for inner in bundle.content {
                    self.handle_packet(inner);
                }
            }
        }
    }
}

/// UDP/OSC implementation of the control surface
pub struct OscControl {
    socket: Option<Arc<UdpSocket>>,
    target: Option<(String, u16)>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    stop: Arc<AtomicBool>,
    receiver: Option<thread::JoinHandle<()>>,
}

impl OscControl {
    pub fn new() -> Self {
        Self {
            socket: None,
            target: None,
            shared: Arc::new(Shared {
                callbacks: RwLock::new(Vec::new()),
                pending_queries: Mutex::new(Vec::new()),
            }),
            next_id: AtomicU64::new(1),
            stop: Arc::new(AtomicBool::new(false)),
            receiver: None,
        }
    }

    fn spawn_receiver(&mut self, socket: Arc<UdpSocket>) -> EngineResult<()> {
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(EngineError::Io)?;
        let shared = Arc::clone(&self.shared);
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("gm-osc-recv".into())
            .spawn(move || {
                let mut buf = [0u8; RECV_BUF_LEN];
                while !stop.load(Ordering::Acquire) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, _peer)) => match decoder::decode_udp(&buf[..len]) {
                            Ok((_, packet)) => shared.handle_packet(packet),
                            Err(e) => log::warn!("undecodable OSC packet: {e}"),
                        },
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            log::error!("OSC receive failed: {e}");
                            break;
                        }
                    }
                }
            })
            .map_err(EngineError::Io)?;
        self.receiver = Some(handle);
        Ok(())
    }
}

impl Default for OscControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSurface for OscControl {
    fn configure(
        &mut self,
        target_ip: &str,
        target_port: u16,
        receive_port: Option<u16>,
    ) -> EngineResult<()> {
        let bind_port = receive_port.unwrap_or(0);
        let socket = UdpSocket::bind(("0.0.0.0", bind_port)).map_err(EngineError::Io)?;
        let socket = Arc::new(socket);
        self.spawn_receiver(Arc::clone(&socket))?;
        self.socket = Some(socket);
        self.target = Some((target_ip.to_string(), target_port));
        log::info!("OSC control bound, target {target_ip}:{target_port}");
        Ok(())
    }

    fn send(&mut self, address: &str, args: &[ControlArg]) -> EngineResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("control surface not configured".into()))?;
        let (ip, port) = self
            .target
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("control surface not configured".into()))?;
        let packet = OscPacket::Message(OscMessage {
            addr: address.to_string(),
            args: to_osc_args(args),
        });
        let bytes = encoder::encode(&packet)
            .map_err(|e| EngineError::Config(format!("OSC encode failed: {e}")))?;
        socket
            .send_to(&bytes, (ip.as_str(), *port))
            .map_err(EngineError::Io)?;
        Ok(())
    }

    fn query(&mut self, address: &str, callback: ControlQueryCallback) -> EngineResult<()> {
        self.shared
            .pending_queries
            .lock()
            .push((address.to_string(), callback));
        if let Err(e) = self.send(address, &[]) {
            // Undeliverable: fail the query immediately.
            let mut pending = self.shared.pending_queries.lock();
            if let Some(idx) = pending.iter().position(|(addr, _)| addr == address) {
                let (_, callback) = pending.swap_remove(idx);
                callback(false, Vec::new());
            }
            return Err(e);
        }
        Ok(())
    }

    fn add_event_callback(&mut self, callback: ControlEventCallback) -> ControlCallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.callbacks.write().push((id, callback));
        ControlCallbackId(id)
    }

    fn remove_event_callback(&mut self, id: ControlCallbackId) {
        self.shared
            .callbacks
            .write()
            .retain(|(cb_id, _)| *cb_id != id.0);
    }
}

impl Drop for OscControl {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two OscControls talking to each other over loopback.
    #[test]
    fn test_loopback_event_delivery() {
        let mut receiver = OscControl::new();
        receiver.configure("127.0.0.1", 1, Some(0)).unwrap();
        let local_port = receiver
            .socket
            .as_ref()
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        receiver.add_event_callback(Arc::new(move |addr, args| {
            seen_cb.lock().push((addr.to_string(), args.to_vec()));
        }));

        let mut sender = OscControl::new();
        sender.configure("127.0.0.1", local_port, Some(0)).unwrap();
        sender
            .send(
                "/gridmix/node/fx",
                &[
                    ControlArg::Str("update".into()),
                    ControlArg::Str("g".into()),
                    ControlArg::Float(-6.0),
                ],
            )
            .unwrap();

        // UDP delivery on loopback is fast but asynchronous.
        for _ in 0..50 {
            if !seen.lock().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/gridmix/node/fx");
        assert_eq!(seen[0].1[0], ControlArg::Str("update".into()));
        assert_eq!(seen[0].1[2], ControlArg::Float(-6.0));
    }

    #[test]
    fn test_send_before_configure_fails() {
        let mut control = OscControl::new();
        assert!(control.send("/x", &[]).is_err());
    }
}
