//! Detection overlay: confidence tiers, label lifecycle and draw lists.
//!
//! Labels are created only by `ingest` and moved only by `scroll`. Both run
//! on the coordinator thread, so a render never sees a half-ingested batch.

use crate::config::Config;
use crate::feed::{FeedDetection, FeedDocument};
use crate::types::{Rgb, Rgba};
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;

/// Labels further than this past the trailing edge are destroyed.
pub const SCROLL_OFF_MARGIN: f32 = 10.0;
/// Source-time distance within which two same-name singles are duplicates.
const DUPLICATE_OFFSET_S: f64 = 2.0;
/// Groups are 0.1 s buckets of source time.
const BUCKETS_PER_SECOND: f64 = 10.0;
const EDGE_TOLERANCE: f64 = 1e-9;

const PANEL_COLOR: Rgba = Rgba::new(0, 0, 0, 0.6);
const NAME_COLOR: Rgba = Rgba::new(255, 255, 255, 1.0);
const PANEL_PADDING_EM: f32 = 0.25;
const LANE_SPACING_EM: f32 = 1.6;

// ─── Classification ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
    Low,
    Hidden,
}

impl Tier {
    /// Color of the percentage segment.
    pub fn color(self) -> Rgb {
        match self {
            Tier::High => Rgb(76, 175, 80),
            Tier::Medium => Rgb(255, 193, 7),
            Tier::Low => Rgb(244, 67, 54),
            Tier::Hidden => Rgb(158, 158, 158),
        }
    }
}

/// Only the band just below the threshold is split into medium and low.
/// Checked in order: high, medium, low, hidden.
pub fn classify(confidence: f64, threshold: f64) -> Tier {
    if confidence >= threshold {
        Tier::High
    } else if (confidence - threshold).abs() <= 0.05 + EDGE_TOLERANCE {
        Tier::Medium
    } else if confidence >= threshold - 0.10 - EDGE_TOLERANCE {
        Tier::Low
    } else {
        Tier::Hidden
    }
}

// ─── Labels ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionLabel {
    pub name: String,
    pub confidence: f64,
    /// Seconds into the analyzed recording.
    pub source_start: f64,
    pub ingested_ms: u64,
    /// Scroll-axis position of the label's right edge, in raster units.
    pub position: f32,
    pub multi: bool,
    /// Stacking index inside a multi-detection group.
    pub lane: usize,
    pub seq: u64,
}

impl DetectionLabel {
    pub fn tier(&self, threshold: f64) -> Tier {
        classify(self.confidence, threshold)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub created: usize,
    pub suppressed: usize,
    pub expired: usize,
    pub evicted: usize,
    /// Detections already past the trailing margin when placed.
    pub stale: usize,
    /// Document carried the same file name as the previous one.
    pub unchanged: bool,
}

#[derive(Default)]
pub struct DetectionOverlay {
    /// Most recent first.
    labels: VecDeque<DetectionLabel>,
    next_seq: u64,
    last_file: Option<String>,
}

impl DetectionOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> impl Iterator<Item = &DetectionLabel> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn last_file(&self) -> Option<&str> {
        self.last_file.as_deref()
    }

    /// Apply one feed document: expire, then create, dedupe and cap.
    pub fn ingest(
        &mut self,
        doc: &FeedDocument,
        now_ms: u64,
        width: usize,
        cfg: &Config,
    ) -> IngestReport {
        let mut report = IngestReport {
            expired: self.expire(now_ms, cfg),
            ..Default::default()
        };

        if !doc.file_name.is_empty() {
            if self.last_file.as_deref() == Some(doc.file_name.as_str()) {
                report.unchanged = true;
                return report;
            }
            self.last_file = Some(doc.file_name.clone());
        }

        let threshold = cfg.confidence_threshold as f64;
        let visible: Vec<&FeedDetection> = doc
            .detections
            .iter()
            .filter(|d| classify(d.confidence, threshold) != Tier::Hidden)
            .collect();

        let mut accepted: Vec<DetectionLabel> = Vec::new();
        for group in group_by_bucket(&visible) {
            let multi = group.len() > 1;
            for (lane, det) in group.into_iter().enumerate() {
                let position = initial_position(width, doc.delay, det.start, cfg);
                if position < -SCROLL_OFF_MARGIN {
                    report.stale += 1;
                    continue;
                }
                if !multi && self.is_duplicate(det, &accepted, now_ms, cfg) {
                    debug!("Suppressed duplicate {} at {:.1}s", det.common_name, det.start);
                    report.suppressed += 1;
                    continue;
                }
                let seq = self.next_seq;
                self.next_seq += 1;
                accepted.push(DetectionLabel {
                    name: det.common_name.clone(),
                    confidence: det.confidence,
                    source_start: det.start,
                    ingested_ms: now_ms,
                    position,
                    multi,
                    lane,
                    seq,
                });
            }
        }

        report.created = accepted.len();
        for label in accepted {
            self.labels.push_front(label);
        }
        if self.labels.len() > cfg.max_labels {
            report.evicted = self.labels.len() - cfg.max_labels;
            self.labels.truncate(cfg.max_labels);
        }
        report
    }

    fn is_duplicate(
        &self,
        det: &FeedDetection,
        batch: &[DetectionLabel],
        now_ms: u64,
        cfg: &Config,
    ) -> bool {
        let threshold = cfg.confidence_threshold as f64;
        self.labels.iter().chain(batch.iter()).any(|l| {
            l.name == det.common_name
                && (det.start - l.source_start).abs() <= DUPLICATE_OFFSET_S + EDGE_TOLERANCE
                && l.tier(threshold) == Tier::High
                && now_ms.saturating_sub(l.ingested_ms) <= cfg.duplicate_window_ms
        })
    }

    /// Drop labels past their tier's timeout, and any that now classify as
    /// hidden. Returns how many were removed.
    pub fn expire(&mut self, now_ms: u64, cfg: &Config) -> usize {
        let threshold = cfg.confidence_threshold as f64;
        let before = self.labels.len();
        self.labels.retain(|l| {
            let timeout = match l.tier(threshold) {
                Tier::Hidden => return false,
                Tier::Low => cfg.low_confidence_timeout_ms,
                Tier::High | Tier::Medium => cfg.label_timeout_ms,
            };
            now_ms.saturating_sub(l.ingested_ms) <= timeout
        });
        before - self.labels.len()
    }

    /// Move every label toward the trailing edge. Returns how many scrolled off.
    pub fn scroll(&mut self, units: f32) -> usize {
        let before = self.labels.len();
        for l in self.labels.iter_mut() {
            l.position -= units;
        }
        self.labels.retain(|l| l.position >= -SCROLL_OFF_MARGIN);
        before - self.labels.len()
    }

    /// Draw list for the current positions. Labels outside the visible axis
    /// are skipped but kept.
    pub fn render(
        &self,
        width: usize,
        cfg: &Config,
        metrics: &dyn TextMetrics,
    ) -> Vec<LabelDrawCommand> {
        let threshold = cfg.confidence_threshold as f64;
        let font_px = cfg.label_font_px;
        let pad = font_px * PANEL_PADDING_EM;
        let line_h = metrics.line_height(font_px);

        let mut out = Vec::new();
        for l in &self.labels {
            let tier = l.tier(threshold);
            if tier == Tier::Hidden {
                continue;
            }
            let percent = format!(" {}%", (l.confidence * 100.0).round() as i64);
            let name_w = metrics.text_width(&l.name, font_px);
            let percent_w = metrics.text_width(&percent, font_px);
            let panel_w = name_w + percent_w + 2.0 * pad;

            // Right-anchored: the panel extends left of the anchor.
            if l.position < 0.0 || l.position - panel_w > width as f32 {
                continue;
            }

            out.push(LabelDrawCommand {
                x: l.position,
                y: font_px * LANE_SPACING_EM * (l.lane + 1) as f32,
                rotation_deg: cfg.label_rotation_deg,
                font_px,
                tier,
                name: TextSegment {
                    text: l.name.clone(),
                    dx: -(percent_w + name_w + pad),
                    color: NAME_COLOR,
                },
                percent: TextSegment {
                    text: percent,
                    dx: -(percent_w + pad),
                    color: Rgba {
                        rgb: tier.color(),
                        alpha: 1.0,
                    },
                },
                panel: Panel {
                    dx: -panel_w,
                    dy: -(line_h + pad),
                    width: panel_w,
                    height: line_h + 2.0 * pad,
                    color: PANEL_COLOR,
                },
            });
        }
        out
    }
}

fn initial_position(width: usize, delay_s: f64, start_s: f64, cfg: &Config) -> f32 {
    let age_s = (delay_s - start_s).max(0.0) as f32;
    width as f32 - age_s * cfg.units_per_second()
}

/// Bucket detections by 0.1 s of source time, keeping first-seen order.
fn group_by_bucket<'a>(detections: &[&'a FeedDetection]) -> Vec<Vec<&'a FeedDetection>> {
    let mut groups: Vec<(i64, Vec<&FeedDetection>)> = Vec::new();
    for &d in detections {
        let bucket = (d.start * BUCKETS_PER_SECOND).floor() as i64;
        match groups.iter_mut().find(|(b, _)| *b == bucket) {
            Some((_, members)) => members.push(d),
            None => groups.push((bucket, vec![d])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

// ─── Drawing ────────────────────────────────────────────────────────────────

/// Text measurement used to size label panels.
pub trait TextMetrics {
    fn text_width(&self, text: &str, font_px: f32) -> f32;
    fn line_height(&self, font_px: f32) -> f32;
}

/// Fixed advance per character. Good enough for a monospace viewer font.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceMetrics {
    pub advance_em: f32,
    pub line_em: f32,
}

impl Default for MonospaceMetrics {
    fn default() -> Self {
        Self {
            advance_em: 0.6,
            line_em: 1.2,
        }
    }
}

impl TextMetrics for MonospaceMetrics {
    fn text_width(&self, text: &str, font_px: f32) -> f32 {
        text.chars().count() as f32 * self.advance_em * font_px
    }

    fn line_height(&self, font_px: f32) -> f32 {
        self.line_em * font_px
    }
}

/// Offsets are in the label's local frame: origin at the anchor, before
/// rotation, text baseline at dy = 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSegment {
    pub text: String,
    pub dx: f32,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Panel {
    pub dx: f32,
    pub dy: f32,
    pub width: f32,
    pub height: f32,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelDrawCommand {
    pub x: f32,
    pub y: f32,
    pub rotation_deg: f32,
    pub font_px: f32,
    pub tier: Tier,
    pub name: TextSegment,
    pub percent: TextSegment,
    pub panel: Panel,
}
