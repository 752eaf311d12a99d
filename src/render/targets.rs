/// Render target bookkeeping shared by both backends
///
/// Targets are addressed by `Slot`. Full-resolution slots follow the output
/// frame; the two glow slots live at a reduced "quarter" resolution.

use crate::config::EngineConfig;

/// Named offscreen buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Accumulator pair, flipped by `DoubleBuffer`
    MainA,
    MainB,
    /// Output of a mask-local adjustment pass
    Local,
    /// Coverage field of the current mask (red channel)
    Mask,
    /// Glow chain, reduced resolution
    Ping,
    Pong,
    /// Final 8-bit composite
    Frame,
    /// Square 8-bit composite for histogram/vectorscope
    Analysis,
}

impl Slot {
    pub const FULL: [Slot; 5] = [Slot::MainA, Slot::MainB, Slot::Local, Slot::Mask, Slot::Frame];
    pub const QUARTER: [Slot; 2] = [Slot::Ping, Slot::Pong];

    /// Slots that hold display-referred 8-bit color
    pub fn is_display(self) -> bool {
        matches!(self, Slot::Frame | Slot::Analysis)
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::MainA => "main-a",
            Slot::MainB => "main-b",
            Slot::Local => "local",
            Slot::Mask => "mask",
            Slot::Ping => "ping",
            Slot::Pong => "pong",
            Slot::Frame => "frame",
            Slot::Analysis => "analysis",
        }
    }
}

/// Sizes for one resolution class of the render graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSizes {
    pub width: u32,
    pub height: u32,
    pub glow_width: u32,
    pub glow_height: u32,
}

impl TargetSizes {
    pub fn new(width: u32, height: u32, config: &EngineConfig) -> Self {
        let divisor = config.glow_divisor.max(1);
        Self {
            width,
            height,
            glow_width: (width / divisor).max(config.glow_min_dim),
            glow_height: (height / divisor).max(config.glow_min_dim),
        }
    }

    pub fn size_of(&self, slot: Slot) -> Option<(u32, u32)> {
        match slot {
            Slot::Ping | Slot::Pong => Some((self.glow_width, self.glow_height)),
            Slot::Analysis => None,
            _ => Some((self.width, self.height)),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Rectangle in pixels, origin top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// The accumulator pair: one slot holds the running result, the other is
/// scratch for the next composite. Swapping flips an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoubleBuffer {
    index: usize,
}

impl DoubleBuffer {
    const SLOTS: [Slot; 2] = [Slot::MainA, Slot::MainB];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Slot {
        Self::SLOTS[self.index]
    }

    pub fn scratch(&self) -> Slot {
        Self::SLOTS[1 - self.index]
    }

    pub fn swap(&mut self) {
        self.index = 1 - self.index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glow_targets_quarter_with_floor() {
        let config = EngineConfig::default();
        let sizes = TargetSizes::new(2000, 1000, &config);
        assert_eq!(sizes.size_of(Slot::Ping), Some((500, 250)));
        assert_eq!(sizes.size_of(Slot::Frame), Some((2000, 1000)));

        let small = TargetSizes::new(120, 80, &config);
        assert_eq!(small.size_of(Slot::Pong), Some((64, 64)));
    }

    #[test]
    fn test_double_buffer_swap() {
        let mut buffer = DoubleBuffer::new();
        let first = buffer.current();
        let scratch = buffer.scratch();
        assert_ne!(first, scratch);

        buffer.swap();
        assert_eq!(buffer.current(), scratch);
        assert_eq!(buffer.scratch(), first);

        buffer.swap();
        assert_eq!(buffer.current(), first);
    }

    #[test]
    fn test_display_slots() {
        assert!(Slot::Frame.is_display());
        assert!(Slot::Analysis.is_display());
        assert!(!Slot::MainA.is_display());
    }
}
