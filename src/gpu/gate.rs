//! Queue gate: bounds the number of in-flight GPU submissions.
//!
//! The orchestrator is a sequential state machine; the gate is the only
//! place where it waits on the GPU. `submit` parks until a slot frees up,
//! `wait_idle` parks until nothing is in flight. Both drive completion
//! callbacks by polling the device, so no second thread is involved.
//!
//! The in-flight counter is only incremented after the queue has accepted a
//! submission, so a failed submit leaves the gate unchanged.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use wgpu::{CommandBuffer, Device, Queue};

pub struct QueueGate {
    capacity: u32,
    in_flight: Arc<AtomicU32>,
}

impl QueueGate {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Park until the gate has a free slot, driving `pump` (normally a
    /// device poll) to deliver completion callbacks.
    fn acquire_with(&self, mut pump: impl FnMut()) {
        while self.in_flight() >= self.capacity {
            pump();
        }
    }

    /// Submit a command buffer, waiting for gate capacity first.
    pub fn submit(&self, device: &Device, queue: &Queue, cmd: CommandBuffer) {
        self.acquire_with(|| {
            device.poll(wgpu::Maintain::Wait);
        });

        queue.submit(Some(cmd));
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let counter = self.in_flight.clone();
        queue.on_submitted_work_done(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Park until every submission has drained. This is the safe point for
    /// swapping reallocated scene buffers.
    pub fn wait_idle(&self, device: &Device) {
        while self.in_flight() > 0 {
            device.poll(wgpu::Maintain::Wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_blocks_at_capacity() {
        let gate = QueueGate::new(2);

        // Two submissions fit without waiting.
        gate.acquire_with(|| panic!("should not wait with empty gate"));
        gate.in_flight.fetch_add(1, Ordering::SeqCst);
        gate.acquire_with(|| panic!("should not wait below capacity"));
        gate.in_flight.fetch_add(1, Ordering::SeqCst);
        assert_eq!(gate.in_flight(), 2);

        // The third parks until a completion arrives; the pump stands in
        // for the device poll delivering the callback.
        let mut pumps = 0;
        gate.acquire_with(|| {
            pumps += 1;
            gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        assert_eq!(pumps, 1);
        assert!(gate.in_flight() < 2, "a slot must be free after acquire");
    }

    #[test]
    fn test_gate_capacity_floor() {
        let gate = QueueGate::new(0);
        assert_eq!(gate.capacity(), 1);
    }
}
