//! The pixel controller: owns one light run's buffer and is its only
//! writer. External updates, animation ticks, and output ticks all funnel
//! through a single channel, so every mutation is serialized and no locking
//! happens here.

use log::{info, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::mpsc::Receiver;

use crate::animation::{ActionMode, Blinker, Chaser};
use crate::config::{ColorScheme, Config};
use crate::connection::DdpConnection;

/// Inclusive pixel interval, the wire representation of "these pixels are
/// on". Overlap is idempotent; a reversed range is an empty interval, not
/// an error.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Range {
    pub from: i32,
    pub to: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMetadata {
    #[serde(rename = "CurLight")]
    pub cur_light: i32,
    #[serde(rename = "Mode")]
    pub mode: String,
}

/// One external state update: the current pixel, a mode tag, and the full
/// batch of on ranges.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    #[serde(rename = "Metadata")]
    pub metadata: UpdateMetadata,
    #[serde(rename = "OnRanges")]
    pub on_ranges: Vec<Range>,
}

pub enum ControllerEvent {
    Update(UpdateRequest),
    AnimTick,
    OutputTick,
    Stop,
}

/// Recomputes the per-pixel on/off snapshot from a ranges batch. Always a
/// full recompute; nothing incremental survives between updates.
fn apply_ranges(ranges: &[Range], states: &mut [bool]) {
    for state in states.iter_mut() {
        *state = false;
    }

    for range in ranges {
        for i in range.from..=range.to {
            if i >= 0 && (i as usize) < states.len() {
                states[i as usize] = true;
            }
        }
    }
}

/// Writes one pixel's RGB bytes; indices outside the buffer are silently
/// dropped.
fn set_color(data: &mut [u8], num: i32, color: u32) {
    let max = data.len() as i32 / 3 - 1;
    if num < 0 || num > max {
        return;
    }

    let i = num as usize * 3;
    data[i] = (color >> 16) as u8;
    data[i + 1] = (color >> 8) as u8;
    data[i + 2] = color as u8;
}

/// Paints the full buffer: black below `min_pixel`, on/off colors by state,
/// then the blink cursor, then the chase highlights. Later writes win, so a
/// chase at offset zero overrides a simultaneous blink at the same index.
fn render(
    data: &mut [u8],
    min_pixel: usize,
    states: &[bool],
    cur_pixel: i32,
    blink_on: bool,
    chase_offset: Option<usize>,
    colors: &ColorScheme,
) {
    for (i, &on) in states.iter().enumerate() {
        if i < min_pixel {
            set_color(data, i as i32, 0);
        } else if on {
            set_color(data, i as i32, colors.on);
        } else {
            set_color(data, i as i32, colors.off);
        }
    }

    if blink_on {
        set_color(data, cur_pixel, colors.blink);
    }

    if let Some(offset) = chase_offset {
        let offset = offset as i32;
        set_color(data, cur_pixel - offset, colors.chase);
        set_color(data, cur_pixel + offset, colors.chase);
    }
}

pub struct PixelController {
    conn: DdpConnection,
    dst: SocketAddr,
    min_pixel: usize,
    colors: ColorScheme,
    events: Receiver<ControllerEvent>,
    data: Vec<u8>,
    states: Vec<bool>,
    cur_pixel: i32,
    blinker: Blinker,
    chaser: Chaser,
}

impl PixelController {
    pub fn new(
        conn: DdpConnection,
        dst: SocketAddr,
        config: &Config,
        events: Receiver<ControllerEvent>,
    ) -> PixelController {
        let num_pixels = config.max_pixel + 1;

        PixelController {
            conn,
            dst,
            min_pixel: config.min_pixel,
            colors: config.colors(),
            events,
            data: vec![0u8; num_pixels * 3],
            states: vec![false; num_pixels],
            cur_pixel: 0,
            blinker: Blinker::new(),
            chaser: Chaser::new(config.chase_size),
        }
    }

    /// Drains events in arrival order until the stop event arrives or every
    /// sender hangs up.
    pub fn run(&mut self) {
        info!("pixel controller starting");

        while let Ok(event) = self.events.recv() {
            match event {
                ControllerEvent::Update(update) => self.handle_update(update),
                ControllerEvent::AnimTick => self.handle_anim_tick(),
                ControllerEvent::OutputTick => self.handle_output_tick(),
                ControllerEvent::Stop => break,
            }
        }

        info!("pixel controller exiting");
    }

    fn handle_update(&mut self, update: UpdateRequest) {
        self.cur_pixel = update.metadata.cur_light;
        self.chaser.set_mode(ActionMode::parse(&update.metadata.mode));
        apply_ranges(&update.on_ranges, &mut self.states);
        self.repaint();
    }

    fn handle_anim_tick(&mut self) {
        self.blinker.advance();
        self.chaser.advance();
        self.repaint();
    }

    fn handle_output_tick(&mut self) {
        // Unconditional resend: a receiver that joined late or dropped a
        // frame self-heals on the next tick.
        if let Err(err) = self.conn.set_pixels(&self.data, self.dst) {
            warn!("failed to set pixels: {err:#}");
        }
    }

    fn repaint(&mut self) {
        render(
            &mut self.data,
            self.min_pixel,
            &self.states,
            self.cur_pixel,
            self.blinker.is_on(),
            self.chaser.visible_offset(),
            &self.colors,
        );
    }
}
