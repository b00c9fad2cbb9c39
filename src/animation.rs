//! Animation state for one light run: the blinking cursor and the chase
//! highlight, each advanced one step per animation tick.

/// Controller mode parsed from the external update's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    Unknown,
    Nav,
    On,
    Off,
    Find,
}

impl ActionMode {
    /// Unrecognized tags map to `Unknown`, which is chase-inert.
    pub fn parse(tag: &str) -> ActionMode {
        match tag {
            "NAV" => ActionMode::Nav,
            "ON" => ActionMode::On,
            "OFF" => ActionMode::Off,
            "FIND" => ActionMode::Find,
            _ => ActionMode::Unknown,
        }
    }
}

/// Four-phase cursor blink: on for phases 0 and 1, off for 2 and 3, so the
/// full period is four animation ticks.
pub struct Blinker {
    phase: u8,
}

impl Blinker {
    pub fn new() -> Blinker {
        Blinker { phase: 0 }
    }

    pub fn advance(&mut self) {
        self.phase = (self.phase + 1) % 4;
    }

    pub fn is_on(&self) -> bool {
        self.phase < 2
    }
}

/// Sweeping highlight around the current pixel. The raw offset counts down
/// from `2 * size` and wraps; the painted offset is half that, so each
/// position holds for two ticks.
pub struct Chaser {
    size: usize,
    offset: usize,
    mode: ActionMode,
}

impl Chaser {
    pub fn new(size: usize) -> Chaser {
        Chaser {
            size,
            offset: 0,
            mode: ActionMode::Unknown,
        }
    }

    pub fn advance(&mut self) {
        self.offset = match self.offset.checked_sub(1) {
            Some(offset) => offset,
            None => self.size * 2,
        };
    }

    pub fn set_mode(&mut self, mode: ActionMode) {
        self.mode = mode;
    }

    /// The offset to paint at, or `None` while dormant. Only FIND mode
    /// animates. A raw offset of 1 yields `Some(0)`: the chase then paints
    /// the current pixel itself, taking precedence over the blink cursor.
    pub fn visible_offset(&self) -> Option<usize> {
        if self.mode == ActionMode::Find && self.offset != 0 {
            Some(self.offset / 2)
        } else {
            None
        }
    }
}
