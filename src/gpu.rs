//! The text-mode GPU sink.
//!
//! Grounded on `original_source/evil/gpu.py`: a fixed `width x height`
//! grid of Unicode codepoints with a wrapping cursor, refreshed to a
//! text sink no faster than `refresh_rate_hz`. The sink is an injected
//! `std::io::Write` rather than a hardcoded `sys.stdout`, so tests can
//! capture output without touching process-global state.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::error::GpuFault;

/// Default grid dimensions, matching `CPU.execute`'s hardcoded
/// `GPU(width=80, height=24)`.
pub const DEFAULT_WIDTH: usize = 80;
pub const DEFAULT_HEIGHT: usize = 24;
const DEFAULT_REFRESH_RATE_HZ: u32 = 60;

/// A character-grid display with a wrapping write cursor.
pub struct Gpu<W: Write> {
    width: usize,
    height: usize,
    refresh_interval: Duration,
    last_refresh: Instant,
    pixels: Vec<u32>,
    cursor_x: usize,
    cursor_y: usize,
    sink: W,
}

impl<W: Write> Gpu<W> {
    /// Builds a blank `width x height` grid writing to `sink`, refreshed
    /// at the default 60 Hz.
    pub fn new(width: usize, height: usize, sink: W) -> Self {
        Self::with_refresh_rate(width, height, DEFAULT_REFRESH_RATE_HZ, sink)
    }

    /// Like [`Gpu::new`], with an explicit refresh rate.
    pub fn with_refresh_rate(width: usize, height: usize, refresh_rate_hz: u32, sink: W) -> Self {
        Self {
            width,
            height,
            refresh_interval: Duration::from_secs_f64(1.0 / refresh_rate_hz as f64),
            last_refresh: Instant::now(),
            pixels: vec![0; width * height],
            cursor_x: 0,
            cursor_y: 0,
            sink,
        }
    }

    fn normalize_cursor(&mut self) {
        let quotient = self.cursor_x / self.width;
        self.cursor_x %= self.width;
        self.cursor_y = (self.cursor_y + quotient) % self.height;
    }

    /// Writes `n` at the cursor and advances it, wrapping at the end of a
    /// row and across the bottom of the grid.
    pub fn put(&mut self, n: i128) -> Result<(), GpuFault> {
        let codepoint = u32::try_from(n)
            .ok()
            .filter(|&c| c < 0x11_0000)
            .ok_or(GpuFault::InvalidCharacter(n))?;
        let idx = self.cursor_y * self.width + self.cursor_x;
        self.pixels[idx] = codepoint;
        self.cursor_x += 1;
        self.normalize_cursor();
        Ok(())
    }

    /// Moves the write cursor to `(x, y)`, bounds-checked against the grid.
    pub fn seek(&mut self, x: i128, y: i128) -> Result<(), GpuFault> {
        let in_range = |v: i128, bound: usize| v >= 0 && (v as usize) < bound;
        if !in_range(x, self.width) || !in_range(y, self.height) {
            return Err(GpuFault::InvalidSeek {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        self.cursor_x = x as usize;
        self.cursor_y = y as usize;
        Ok(())
    }

    fn render(&mut self) -> io::Result<()> {
        for row in self.pixels.chunks(self.width) {
            for &codepoint in row {
                let c = char::from_u32(codepoint).filter(|c| !c.is_control());
                write!(self.sink, "{}", c.unwrap_or(' '))?;
            }
            writeln!(self.sink)?;
        }
        writeln!(self.sink)?;
        self.sink.flush()
    }

    /// Renders the grid to the sink if `force` or the refresh interval has
    /// elapsed since the last render.
    pub fn refresh(&mut self, force: bool) -> io::Result<()> {
        let now = Instant::now();
        if force || now.duration_since(self.last_refresh) >= self.refresh_interval {
            self.last_refresh = now;
            self.render()?;
        }
        Ok(())
    }

    /// Consumes the GPU, returning its sink. Used by callers (and tests)
    /// that want to inspect what was written after execution finishes.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Reads back the grid's current contents as codepoints, row-major,
    /// independent of whether a `refresh` has happened yet. Used by the
    /// `dbg`/`dbg.ram` debug instructions' callers and by tests asserting
    /// on screen contents without depending on refresh timing.
    pub fn cells(&self) -> &[u32] {
        &self.pixels
    }

    /// Grid width, in codepoints.
    pub fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_advances_cursor_and_wraps_rows() {
        let mut gpu = Gpu::new(2, 2, Vec::new());
        gpu.put('a' as i128).unwrap();
        gpu.put('b' as i128).unwrap();
        gpu.put('c' as i128).unwrap();
        assert_eq!(gpu.cursor_x, 1);
        assert_eq!(gpu.cursor_y, 1);
    }

    #[test]
    fn seek_out_of_range_faults() {
        let mut gpu = Gpu::new(2, 2, Vec::new());
        assert_eq!(
            gpu.seek(5, 0),
            Err(GpuFault::InvalidSeek {
                x: 5,
                y: 0,
                width: 2,
                height: 2
            })
        );
    }

    #[test]
    fn put_rejects_value_above_unicode_max() {
        let mut gpu = Gpu::new(2, 2, Vec::new());
        assert!(gpu.put(0x11_0000).is_err());
    }

    #[test]
    fn forced_refresh_writes_grid_once() {
        let mut gpu = Gpu::new(2, 1, Vec::new());
        gpu.put('H' as i128).unwrap();
        gpu.put('i' as i128).unwrap();
        gpu.refresh(true).unwrap();
        assert_eq!(gpu.sink, b"Hi\n\n");
    }
}
