use anyhow::{bail, Result};
use serde::Deserialize;

use crate::connection::MAX_CHANS_PER_PACKET;

fn default_on_color() -> u32 {
    0x00ff00
}

fn default_off_color() -> u32 {
    0xff0000
}

fn default_blink_color() -> u32 {
    0x0000ff
}

fn default_chase_color() -> u32 {
    0x00ff00
}

fn default_interval_ms() -> u64 {
    100
}

fn default_max_chans() -> usize {
    MAX_CHANS_PER_PACKET
}

fn default_chase_size() -> usize {
    5
}

/// Configuration for one light run, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// DDP controller destination as `host[:port]`; the default DDP port is
    /// applied when omitted.
    pub ddp: String,
    /// Lowest controllable pixel index; everything below renders black.
    pub min_pixel: usize,
    /// Highest pixel index; the run drives `max_pixel + 1` pixels.
    pub max_pixel: usize,
    #[serde(default = "default_on_color")]
    pub on_color: u32,
    #[serde(default = "default_off_color")]
    pub off_color: u32,
    #[serde(default = "default_blink_color")]
    pub blink_color: u32,
    #[serde(default = "default_chase_color")]
    pub chase_color: u32,
    /// Animation tick period in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub anim_interval_ms: u64,
    /// Output tick period in milliseconds, independent of the animation
    /// tick.
    #[serde(default = "default_interval_ms")]
    pub output_interval_ms: u64,
    /// Maximum payload bytes per DDP packet.
    #[serde(default = "default_max_chans")]
    pub max_chans_per_packet: usize,
    /// Half-width of the chase sweep, in pixels.
    #[serde(default = "default_chase_size")]
    pub chase_size: usize,
}

/// The paint colors for a run, each 0xRRGGBB.
#[derive(Debug, Clone, Copy)]
pub struct ColorScheme {
    pub on: u32,
    pub off: u32,
    pub blink: u32,
    pub chase: u32,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.ddp.is_empty() {
            bail!("ddp destination must not be empty");
        }
        if self.min_pixel > self.max_pixel {
            bail!(
                "min_pixel {} exceeds max_pixel {}",
                self.min_pixel,
                self.max_pixel
            );
        }

        let colors = [
            ("on_color", self.on_color),
            ("off_color", self.off_color),
            ("blink_color", self.blink_color),
            ("chase_color", self.chase_color),
        ];
        for (name, color) in colors {
            if color > 0xffffff {
                bail!("{name} {color:#x} out of range; colors are 0xRRGGBB");
            }
        }

        if self.anim_interval_ms == 0 {
            bail!("anim_interval_ms must be nonzero");
        }
        if self.output_interval_ms == 0 {
            bail!("output_interval_ms must be nonzero");
        }
        if self.max_chans_per_packet == 0 || self.max_chans_per_packet > 0xffff {
            bail!(
                "max_chans_per_packet {} out of range 1..=65535",
                self.max_chans_per_packet
            );
        }

        Ok(())
    }

    pub fn colors(&self) -> ColorScheme {
        ColorScheme {
            on: self.on_color,
            off: self.off_color,
            blink: self.blink_color,
            chase: self.chase_color,
        }
    }
}
