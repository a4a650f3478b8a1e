//! Scrolling raster: the persistent RGBA history of painted slices.
//!
//! Time runs right-to-left. The newest slice is always painted into the
//! right-most column (the leading edge); scrolling moves everything one
//! column left and drops the left-most column. Frequency runs bottom-up.

use crate::colormap::ColorMapper;
use crate::error::RasterError;
use crate::freq_map::{frequency_to_coordinate, Band, BinSpan};
use crate::types::{FrequencySlice, Rgb};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

const BYTES_PER_PIXEL: usize = 4;

pub struct RasterBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    background: Rgb,
    /// Columns painted since the last re-initialization.
    columns_painted: u64,
}

impl RasterBuffer {
    pub fn new(width: usize, height: usize, background: Rgb) -> Self {
        let mut raster = Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            background,
            columns_painted: 0,
        };
        raster.reinit(width, height, background);
        raster
    }

    /// Reallocate at the given size and clear to `background`. Prior
    /// content is discarded even when the size is unchanged.
    pub fn reinit(&mut self, width: usize, height: usize, background: Rgb) {
        self.width = width;
        self.height = height;
        self.background = background;
        self.pixels = vec![0; width * height * BYTES_PER_PIXEL];
        for px in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&[background.0, background.1, background.2, 255]);
        }
        self.columns_painted = 0;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    pub fn columns_painted(&self) -> u64 {
        self.columns_painted
    }

    fn check(&self) -> Result<(), RasterError> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::EmptySurface);
        }
        let expected = self.width * self.height * BYTES_PER_PIXEL;
        if self.pixels.len() != expected {
            return Err(RasterError::SizeMismatch {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// Shift every row one column left and clear the leading column.
    pub fn scroll(&mut self) -> Result<(), RasterError> {
        self.check()?;
        let stride = self.width * BYTES_PER_PIXEL;
        let bg = [self.background.0, self.background.1, self.background.2, 255];
        for row in self.pixels.chunks_exact_mut(stride) {
            row.copy_within(BYTES_PER_PIXEL.., 0);
            row[stride - BYTES_PER_PIXEL..].copy_from_slice(&bg);
        }
        Ok(())
    }

    /// Paint one slice into the leading column. Only the given spans are
    /// touched; everything else keeps the background written by `scroll`.
    pub fn paint(
        &mut self,
        slice: &FrequencySlice,
        spans: &[BinSpan],
        mapper: &ColorMapper,
    ) -> Result<(), RasterError> {
        self.check()?;
        let x = self.width - 1;
        for span in spans {
            let Some(&magnitude) = slice.magnitudes.get(span.bin) else {
                continue;
            };
            let color = mapper.color(magnitude);
            for coord in span.start..span.end.min(self.height) {
                let y = self.height - 1 - coord;
                self.put(x, y, color);
            }
        }
        self.columns_painted += 1;
        Ok(())
    }

    fn put(&mut self, x: usize, y: usize, c: Rgb) {
        let i = (y * self.width + x) * BYTES_PER_PIXEL;
        self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&[c.0, c.1, c.2, 255]);
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * BYTES_PER_PIXEL;
        let p = self.pixels.get(i..i + 3)?;
        Some(Rgb(p[0], p[1], p[2]))
    }

    /// RGB bytes of one column, top row first.
    pub fn column_rgb(&self, x: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.height * 3);
        for y in 0..self.height {
            if let Some(c) = self.pixel(x, y) {
                out.extend_from_slice(&[c.0, c.1, c.2]);
            }
        }
        out
    }

    pub fn leading_column_rgb(&self) -> Vec<u8> {
        if self.width == 0 {
            return Vec::new();
        }
        self.column_rgb(self.width - 1)
    }

    pub fn capture(&self) -> RasterCapture {
        RasterCapture {
            width: self.width as u32,
            height: self.height as u32,
            rgba: self.pixels.clone(),
        }
    }
}

// ─── Capture ────────────────────────────────────────────────────────────────

/// Snapshot of the raster as straight RGBA8. Where it is stored is up to
/// the caller.
#[derive(Debug, Clone)]
pub struct RasterCapture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl RasterCapture {
    pub fn encode_png(&self) -> Result<Vec<u8>, String> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| "capture buffer does not match its dimensions".to_string())?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .map_err(|e| format!("PNG encode failed: {}", e))?;
        Ok(bytes)
    }

    pub fn save_png(&self, path: &Path) -> Result<(), String> {
        image::save_buffer(
            path,
            &self.rgba,
            self.width,
            self.height,
            image::ColorType::Rgba8,
        )
        .map_err(|e| format!("save {:?}: {}", path, e))
    }
}

// ─── Reference lines ────────────────────────────────────────────────────────

/// Static horizontal frequency marker. Does not scroll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceLine {
    pub hz: f32,
    /// Row in raster coordinates (0 = top).
    pub y: f32,
    pub label: String,
}

const NICE_STEPS: [f32; 3] = [1.0, 2.0, 5.0];
const MAX_LINEAR_LINES: usize = 8;

/// Marker frequencies on a 1-2-5 progression inside the band.
///
/// Log mapping gets one marker per 1-2-5 value per decade; linear mapping
/// gets the finest even step that keeps at most eight markers.
pub fn reference_lines(band: Band, nyquist: f32, height: usize, use_log: bool) -> Vec<ReferenceLine> {
    if height == 0 || band.max_hz <= band.min_hz || band.max_hz <= 0.0 {
        return Vec::new();
    }
    let mut freqs = Vec::new();
    if use_log {
        let mut decade = 10f32.powf(band.min_hz.max(1.0).log10().floor());
        while decade <= band.max_hz {
            for step in NICE_STEPS {
                let hz = decade * step;
                if band.contains(hz) {
                    freqs.push(hz);
                }
            }
            decade *= 10.0;
        }
    } else {
        let range = band.max_hz - band.min_hz;
        let mut step = 10f32.powf((range / MAX_LINEAR_LINES as f32).log10().floor());
        'search: loop {
            for mult in NICE_STEPS {
                if range / (step * mult) <= MAX_LINEAR_LINES as f32 {
                    step *= mult;
                    break 'search;
                }
            }
            step *= 10.0;
        }
        let mut hz = (band.min_hz / step).ceil() * step;
        while hz <= band.max_hz {
            if hz > 0.0 {
                freqs.push(hz);
            }
            hz += step;
        }
    }

    let axis = height as f32;
    freqs
        .into_iter()
        .map(|hz| {
            let coord = frequency_to_coordinate(hz, nyquist, axis, band, use_log);
            ReferenceLine {
                hz,
                y: (axis - coord).clamp(0.0, axis - 1.0),
                label: frequency_label(hz),
            }
        })
        .collect()
}

pub fn frequency_label(hz: f32) -> String {
    if hz < 1000.0 {
        format!("{} Hz", hz.round() as u32)
    } else if (hz % 1000.0).abs() < 0.5 {
        format!("{} kHz", (hz / 1000.0).round() as u32)
    } else {
        format!("{:.1} kHz", hz / 1000.0)
    }
}
