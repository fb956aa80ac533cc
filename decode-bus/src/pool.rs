use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::engine::{CodecEngine, FrameHandle, PacketHandle};

/// A rented packet handle that goes back to the engine pool when dropped.
pub struct PooledPacket {
    handle: Option<PacketHandle>,
    engine: Arc<dyn CodecEngine>,
}

impl PooledPacket {
    pub fn rent(engine: &Arc<dyn CodecEngine>) -> anyhow::Result<Self> {
        let handle = engine.rent_packet()?;
        Ok(Self::from_handle(handle, Arc::clone(engine)))
    }

    pub fn from_handle(handle: PacketHandle, engine: Arc<dyn CodecEngine>) -> Self {
        Self {
            handle: Some(handle),
            engine,
        }
    }

    pub fn handle(&self) -> &PacketHandle {
        // Only `take` and `drop` clear the slot, both consume `self`.
        self.handle.as_ref().expect("pooled packet already taken")
    }

    /// Moves the handle out; the caller becomes responsible for returning it.
    pub fn take(mut self) -> PacketHandle {
        self.handle.take().expect("pooled packet already taken")
    }
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.return_packet(handle);
        }
    }
}

impl Debug for PooledPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledPacket")
            .field("handle", &self.handle)
            .finish()
    }
}

/// A rented frame handle that goes back to the engine pool when dropped.
pub struct PooledFrame {
    handle: Option<FrameHandle>,
    engine: Arc<dyn CodecEngine>,
}

impl PooledFrame {
    pub fn rent(engine: &Arc<dyn CodecEngine>) -> anyhow::Result<Self> {
        let handle = engine.rent_frame()?;
        Ok(Self {
            handle: Some(handle),
            engine: Arc::clone(engine),
        })
    }

    pub fn handle(&self) -> &FrameHandle {
        self.handle.as_ref().expect("pooled frame already taken")
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.return_frame(handle);
        }
    }
}

impl Debug for PooledFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrame")
            .field("handle", &self.handle)
            .finish()
    }
}
