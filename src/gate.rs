use std::sync::Mutex;

use crate::error::{PResult, PipelineError};
use crate::sample::{CorrectedSample, DeviceRole};
use crate::window::{ChannelSet, SlidingWindowBuffer, TensorOrder, Window, WindowLayout};

/// Matched windows from both devices, released together
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPair {
    /// Release counter, starting at 1
    pub epoch: u64,
    /// Newest host timestamp across both windows
    pub released_at: i64,
    pub primary: Window,
    pub secondary: Window,
}

impl WindowPair {
    pub fn window(&self, role: DeviceRole) -> &Window {
        match role {
            DeviceRole::Primary => &self.primary,
            DeviceRole::Secondary => &self.secondary,
        }
    }

    /// Flat classifier input for `layout`
    pub fn tensor(&self, layout: WindowLayout, order: TensorOrder) -> Vec<f32> {
        match layout {
            WindowLayout::Single(role) => self.window(role).to_flat(order),
            WindowLayout::Interleaved => {
                Window::interleave(&self.primary, &self.secondary).to_flat(order)
            }
        }
    }
}

#[derive(Debug)]
struct GateState {
    buffers: [SlidingWindowBuffer; 2],
    fresh: [usize; 2],
    epoch: u64,
}

/// Holds both device buffers and releases a pair only once each device has
/// contributed a full window of new samples. Buffers are zeroed after every
/// release, so consecutive windows never share samples.
#[derive(Debug)]
pub struct DualStreamGate {
    window_size: usize,
    state: Mutex<GateState>,
}

impl DualStreamGate {
    pub fn new(window_size: usize, channels: ChannelSet) -> Self {
        let state = GateState {
            buffers: [
                SlidingWindowBuffer::new(window_size, channels),
                SlidingWindowBuffer::new(window_size, channels),
            ],
            fresh: [0, 0],
            epoch: 0,
        };
        Self {
            window_size,
            state: Mutex::new(state),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    fn lock(&self) -> PResult<std::sync::MutexGuard<'_, GateState>> {
        self.state
            .lock()
            .map_err(|_| PipelineError::Internal("Failed to acquire gate lock".to_string()))
    }

    /// Push a sample into its device buffer and count it toward the current epoch
    pub fn on_sample_ingested(&self, role: DeviceRole, sample: &CorrectedSample) -> PResult<()> {
        let mut state = self.lock()?;
        state.buffers[role.index()].push(sample);
        state.fresh[role.index()] += 1;
        Ok(())
    }

    /// Release the matched pair if both devices are ready
    pub fn try_release(&self) -> PResult<Option<WindowPair>> {
        let mut state = self.lock()?;
        Ok(Self::release_locked(&mut state, self.window_size))
    }

    /// Push then check under a single lock acquisition
    pub fn ingest(&self, role: DeviceRole, sample: &CorrectedSample) -> PResult<Option<WindowPair>> {
        let mut state = self.lock()?;
        state.buffers[role.index()].push(sample);
        state.fresh[role.index()] += 1;
        Ok(Self::release_locked(&mut state, self.window_size))
    }

    fn release_locked(state: &mut GateState, window_size: usize) -> Option<WindowPair> {
        if state.fresh.iter().any(|&count| count < window_size) {
            return None;
        }

        let primary = state.buffers[0].snapshot();
        let secondary = state.buffers[1].snapshot();
        let released_at = state
            .buffers
            .iter()
            .filter_map(SlidingWindowBuffer::last_host_timestamp)
            .max()
            .unwrap_or_default();

        state.epoch += 1;
        state.fresh = [0, 0];
        for buffer in &mut state.buffers {
            buffer.reset();
        }

        Some(WindowPair {
            epoch: state.epoch,
            released_at,
            primary,
            secondary,
        })
    }

    /// Fresh-sample counters per device since the last release
    pub fn pending(&self) -> PResult<[usize; 2]> {
        Ok(self.lock()?.fresh)
    }

    pub fn epoch(&self) -> PResult<u64> {
        Ok(self.lock()?.epoch)
    }

    /// Drop partially accumulated epochs on both devices
    pub fn reset(&self) -> PResult<()> {
        let mut state = self.lock()?;
        state.fresh = [0, 0];
        for buffer in &mut state.buffers {
            buffer.reset();
        }
        Ok(())
    }
}
