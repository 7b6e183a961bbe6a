//! GPU context management - wgpu device and queue initialization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::{
    Adapter, Device, DeviceDescriptor, Features, Instance, Limits, Queue, RequestAdapterOptions,
};

use crate::error::TrainError;

pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Initialize GPU context asynchronously.
    ///
    /// Selects the first available GPU adapter and creates a device with
    /// compute shader support. Storage-buffer limits are lifted to whatever
    /// the adapter offers so large scenes bind in one buffer.
    pub async fn new() -> Result<Self, TrainError> {
        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| TrainError::backend("failed to find a GPU adapter"))?;

        let info = adapter.get_info();
        eprintln!("GPU: {} ({:?})", info.name, info.backend);

        let limits = Self::required_limits(&adapter);
        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("tilesplat device"),
                    required_features: Features::empty(),
                    required_limits: limits,
                },
                None,
            )
            .await
            .map_err(|e| TrainError::backend(format!("failed to create device: {e}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            eprintln!("GPU device lost ({reason:?}): {message}");
            lost_flag.store(true, Ordering::SeqCst);
        });

        Ok(Self { device, queue, lost })
    }

    fn required_limits(adapter: &Adapter) -> Limits {
        let adapter_limits = adapter.limits();
        Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..Limits::default()
        }
    }

    /// Synchronous wrapper using pollster.
    ///
    /// This blocks the current thread until GPU initialization completes.
    pub fn new_blocking() -> Result<Self, TrainError> {
        pollster::block_on(Self::new())
    }

    /// Whether the backend reported the device as lost. Training stops when
    /// this flips; the last successfully swapped buffers stay readable.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Fail fast when the device has been lost.
    pub fn check_alive(&self) -> Result<(), TrainError> {
        if self.is_lost() {
            Err(TrainError::backend("device lost"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_context_init() {
        // Machines without an adapter skip rather than fail.
        match GpuContext::new_blocking() {
            Ok(ctx) => assert!(!ctx.is_lost()),
            Err(e) => eprintln!("skipping: {e}"),
        }
    }
}
