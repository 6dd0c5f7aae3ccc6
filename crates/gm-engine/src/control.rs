//! External control surface contract
//!
//! The engine drives a parameter-over-UDP protocol (OSC in practice)
//! through this narrow surface: send, query with an async reply, and an
//! event callback registry with opaque removal handles. The transport
//! itself is a capability provider; [`OscControl`](crate::OscControl)
//! is the shipped implementation and [`MockControl`] serves tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use gm_core::EngineResult;

/// One control message argument
#[derive(Debug, Clone, PartialEq)]
pub enum ControlArg {
    Int(i32),
    Float(f32),
    Str(String),
}

/// Opaque handle for removing an event callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlCallbackId(pub(crate) u64);

/// Event callback: address plus arguments of an incoming message
pub type ControlEventCallback = Arc<dyn Fn(&str, &[ControlArg]) + Send + Sync>;

/// Reply callback for a query: success flag plus returned values
pub type ControlQueryCallback = Box<dyn FnOnce(bool, Vec<ControlArg>) + Send>;

/// Contract of an external control transport
pub trait ControlSurface: Send {
    /// Bind to the peer: target address plus an optional local receive
    /// port.
    fn configure(
        &mut self,
        target_ip: &str,
        target_port: u16,
        receive_port: Option<u16>,
    ) -> EngineResult<()>;

    /// Send one message.
    fn send(&mut self, address: &str, args: &[ControlArg]) -> EngineResult<()>;

    /// Send a query; the callback fires with the peer's reply to the
    /// same address (success=false if the transport cannot deliver).
    fn query(&mut self, address: &str, callback: ControlQueryCallback) -> EngineResult<()>;

    /// Register an event callback for incoming messages.
    fn add_event_callback(&mut self, callback: ControlEventCallback) -> ControlCallbackId;

    /// Remove a previously registered callback.
    fn remove_event_callback(&mut self, id: ControlCallbackId);
}

/// In-memory control surface for tests and driverless embedding.
///
/// Records everything sent; `inject_event` plays the peer's role.
pub struct MockControl {
    sent: Arc<Mutex<Vec<(String, Vec<ControlArg>)>>>,
    callbacks: Arc<RwLock<Vec<(u64, ControlEventCallback)>>>,
    next_id: AtomicU64,
    configured: bool,
}

impl MockControl {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            configured: false,
        }
    }

    /// Handle to the sent-message log, for assertions after the engine
    /// has taken ownership of the surface.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<(String, Vec<ControlArg>)>>> {
        Arc::clone(&self.sent)
    }

    /// Handle that can inject incoming events after the engine has taken
    /// ownership of the surface.
    pub fn injector(&self) -> MockControlInjector {
        MockControlInjector {
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

impl Default for MockControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable event injector for [`MockControl`]
#[derive(Clone)]
pub struct MockControlInjector {
    callbacks: Arc<RwLock<Vec<(u64, ControlEventCallback)>>>,
}

impl MockControlInjector {
    pub fn inject_event(&self, address: &str, args: &[ControlArg]) {
        for (_, callback) in self.callbacks.read().iter() {
            callback(address, args);
        }
    }
}

impl ControlSurface for MockControl {
    fn configure(
        &mut self,
        _target_ip: &str,
        _target_port: u16,
        _receive_port: Option<u16>,
    ) -> EngineResult<()> {
        self.configured = true;
        Ok(())
    }

    fn send(&mut self, address: &str, args: &[ControlArg]) -> EngineResult<()> {
        self.sent.lock().push((address.to_string(), args.to_vec()));
        Ok(())
    }

    fn query(&mut self, address: &str, callback: ControlQueryCallback) -> EngineResult<()> {
        self.sent.lock().push((address.to_string(), Vec::new()));
        // The mock has no peer; report failure so callers exercise the
        // error path.
        callback(false, Vec::new());
        Ok(())
    }

    fn add_event_callback(&mut self, callback: ControlEventCallback) -> ControlCallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, callback));
        ControlCallbackId(id)
    }

    fn remove_event_callback(&mut self, id: ControlCallbackId) {
        self.callbacks.write().retain(|(cb_id, _)| *cb_id != id.0);
    }
}
