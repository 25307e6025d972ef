use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::{ClientError, Transport};

#[derive(Debug, Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    failing: HashSet<u16>,
    connect_fails: bool,
    reject_writes: bool,
    apply_writes: bool,
    connected: bool,
    reads: usize,
    writes: Vec<(u16, Vec<u16>)>,
}

/// In-memory register bank standing in for a real device.
///
/// Clones share state, so a test can keep a handle and script the device
/// while an adapter owns the transport.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register(self, address: u16, value: u16) -> Self {
        self.set_register(address, value);
        self
    }

    pub fn with_registers(self, start: u16, values: &[u16]) -> Self {
        for (offset, value) in values.iter().enumerate() {
            self.set_register(start.wrapping_add(offset as u16), *value);
        }
        self
    }

    /// Writes land in the register bank instead of only being recorded.
    pub fn applying_writes(self) -> Self {
        self.lock().apply_writes = true;
        self
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.lock().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.lock().registers.get(&address).copied()
    }

    pub fn fail_address(&self, address: u16) {
        self.lock().failing.insert(address);
    }

    pub fn restore_address(&self, address: u16) {
        self.lock().failing.remove(&address);
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().connect_fails = offline;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.lock().writes.clone()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), ClientError> {
        let mut state = self.lock();
        if state.connect_fails {
            return Err(ClientError::NotConnected);
        }
        state.connected = true;
        Ok(())
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let mut state = self.lock();
        state.reads += 1;
        if state.connect_fails {
            return Err(ClientError::Timeout { timeout_ms: 0 });
        }
        let mut values = Vec::with_capacity(usize::from(count));
        for offset in 0..count {
            let register = address.wrapping_add(offset);
            if state.failing.contains(&register) {
                return Err(ClientError::NoResponse { address: register });
            }
            values.push(state.registers.get(&register).copied().unwrap_or(0));
        }
        debug!(address, count, "mock read");
        Ok(values)
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.writes.push((address, values.to_vec()));
        if state.connect_fails || state.reject_writes {
            return Err(ClientError::NoResponse { address });
        }
        if state.apply_writes {
            for (offset, value) in values.iter().enumerate() {
                state.registers.insert(address.wrapping_add(offset as u16), *value);
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.lock().connected = false;
    }

    fn describe(&self) -> String {
        "Mock".to_string()
    }
}
