//! Local presence detection
//!
//! Cheap, on-device filtering that runs on every detection tick before any
//! remote match call. A detection that is too small or too far off-center
//! is filtered out and counts as no-presence, so glancing passers-by never
//! reach the match resolver.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::engine::camera::Frame;

/// Bounding box of a detected presence within a frame
#[derive(Debug, Clone, Copy)]
pub struct PresenceBox {
    /// X coordinate of the top-left corner (pixels)
    pub x: u32,
    /// Y coordinate of the top-left corner (pixels)
    pub y: u32,
    /// Width of the bounding box (pixels)
    pub width: u32,
    /// Height of the bounding box (pixels)
    pub height: u32,
}

impl PresenceBox {
    /// Fraction of the frame area the box covers
    pub fn area_fraction(&self, frame_width: u32, frame_height: u32) -> f32 {
        let frame_area = (frame_width * frame_height) as f32;
        if frame_area == 0.0 {
            return 0.0;
        }
        (self.width * self.height) as f32 / frame_area
    }

    /// Normalized distance of the box center from the frame center (0 = centered)
    pub fn center_offset(&self, frame_width: u32, frame_height: u32) -> f32 {
        let cx = self.x as f32 + self.width as f32 / 2.0;
        let cy = self.y as f32 + self.height as f32 / 2.0;
        let dx = (cx - frame_width as f32 / 2.0) / frame_width as f32;
        let dy = (cy - frame_height as f32 / 2.0) / frame_height as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Pluggable presence detection backend
///
/// Implement this trait to provide a real detector (ONNX, platform vision
/// API, etc.). Returning `None` means no acceptable presence in the frame;
/// filtered-out detections also return `None`.
pub trait PresenceDetector: Send + Sync {
    /// Inspect one frame; return an accepted detection or `None`
    fn detect(&self, frame: &Frame) -> Option<PresenceBox>;
}

/// Thresholds for the built-in heuristic detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Minimum fraction of the frame a detection must cover
    pub min_area_fraction: f32,
    /// Maximum normalized distance from frame center
    pub max_center_offset: f32,
    /// Per-cell luma variance below which a cell is background
    pub cell_variance_floor: f32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            min_area_fraction: 0.04,
            max_center_offset: 0.30,
            cell_variance_floor: 120.0,
        }
    }
}

/// Built-in heuristic detector over luma cell variance
///
/// Decodes the JPEG to grayscale, splits it into an 8x8 cell grid, and
/// takes the bounding box of cells whose luma variance clears the floor.
/// Textured foreground (a face against a kiosk backdrop) produces a
/// compact high-variance region; an empty scene does not. Not a face
/// detector, only a presence/quality gate.
pub struct CenterWeightedDetector {
    config: PresenceConfig,
}

const GRID: u32 = 8;

impl CenterWeightedDetector {
    pub fn new(config: PresenceConfig) -> Self {
        Self { config }
    }
}

impl Default for CenterWeightedDetector {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}

impl PresenceDetector for CenterWeightedDetector {
    fn detect(&self, frame: &Frame) -> Option<PresenceBox> {
        let img = match image::load_from_memory(&frame.jpeg) {
            Ok(img) => img.into_luma8(),
            Err(e) => {
                trace!("Frame decode failed, treating as no presence: {}", e);
                return None;
            }
        };

        let (width, height) = img.dimensions();
        if width < GRID || height < GRID {
            return None;
        }

        let cell_w = width / GRID;
        let cell_h = height / GRID;

        // Bounding box over high-variance cells
        let mut min_cx = GRID;
        let mut min_cy = GRID;
        let mut max_cx = 0u32;
        let mut max_cy = 0u32;
        let mut hit = false;

        for cy in 0..GRID {
            for cx in 0..GRID {
                let mut sum = 0.0f32;
                let mut sum_sq = 0.0f32;
                let mut n = 0u32;
                for y in (cy * cell_h)..((cy + 1) * cell_h) {
                    for x in (cx * cell_w)..((cx + 1) * cell_w) {
                        let v = img.get_pixel(x, y)[0] as f32;
                        sum += v;
                        sum_sq += v * v;
                        n += 1;
                    }
                }
                let mean = sum / n as f32;
                let variance = sum_sq / n as f32 - mean * mean;
                if variance > self.config.cell_variance_floor {
                    hit = true;
                    min_cx = min_cx.min(cx);
                    min_cy = min_cy.min(cy);
                    max_cx = max_cx.max(cx);
                    max_cy = max_cy.max(cy);
                }
            }
        }

        if !hit {
            return None;
        }

        let detection = PresenceBox {
            x: min_cx * cell_w,
            y: min_cy * cell_h,
            width: (max_cx - min_cx + 1) * cell_w,
            height: (max_cy - min_cy + 1) * cell_h,
        };

        // Filtered-out detections count as no-presence
        if detection.area_fraction(width, height) < self.config.min_area_fraction {
            trace!("Presence filtered out: too small");
            return None;
        }
        if detection.center_offset(width, height) > self.config.max_center_offset {
            trace!("Presence filtered out: off-center");
            return None;
        }

        Some(detection)
    }
}
