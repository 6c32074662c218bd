//! Heatmap and gradient-overlay sampling for the presentation layer.
//!
//! The price axis is sampled at `samples` evenly spaced points across the
//! book's price range. At each point:
//! - intensity: sum over zones containing the point of
//!   `zone.intensity × max(0, 1 − (d / half_width)²)`, clamped to [0, 1]
//! - density: level count within one bucket width, normalised by the
//!   largest count
//! - gradient: central finite difference of intensity
//!
//! Zero-width zones contribute only at their exact centre.

use serde::{Deserialize, Serialize};

use crate::types::BookState;
use crate::zones::{clamp01, PressureType, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn classify(intensity: f64, density: f64) -> Self {
        if intensity > 0.8 && density > 0.5 {
            RiskLevel::Critical
        } else if intensity > 0.6 || density > 0.3 {
            RiskLevel::High
        } else if intensity > 0.4 || density > 0.2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// One sample of the heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapPoint {
    pub price: f64,
    pub intensity: f64,
    pub density: f64,
    pub gradient: f64,
    pub risk_level: RiskLevel,
}

/// Translucent band drawn over one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientSegment {
    pub zone_id: String,
    pub min_price: f64,
    pub max_price: f64,
    pub center_price: f64,
    pub pressure_type: PressureType,
    /// In [0.2, 0.8]
    pub opacity: f64,
    /// `#rrggbb`
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub samples: usize,
    pub min_opacity: f64,
    pub max_opacity: f64,
    pub support_color: String,
    pub resistance_color: String,
    pub accumulation_color: String,
    pub distribution_color: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            samples: 200,
            min_opacity: 0.2,
            max_opacity: 0.8,
            support_color: "#22c55e".to_string(),
            resistance_color: "#ef4444".to_string(),
            accumulation_color: "#3b82f6".to_string(),
            distribution_color: "#f59e0b".to_string(),
        }
    }
}

impl OverlayConfig {
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn color(&self, pressure: PressureType) -> &str {
        match pressure {
            PressureType::Support => &self.support_color,
            PressureType::Resistance => &self.resistance_color,
            PressureType::Accumulation => &self.accumulation_color,
            PressureType::Distribution => &self.distribution_color,
        }
    }
}

/// Stateless sampler over a book and its zones.
#[derive(Debug, Clone, Default)]
pub struct OverlayFeed {
    config: OverlayConfig,
}

impl OverlayFeed {
    pub fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Sample the heatmap. Empty when the book is empty or its range has no
    /// width.
    pub fn heatmap(&self, book: &BookState, zones: &[Zone]) -> Vec<HeatmapPoint> {
        let n = self.config.samples;
        let range = book.price_range;
        let span = range.span();
        if n == 0 || book.is_empty() || !(span > 0.0) {
            return Vec::new();
        }

        let step = if n > 1 { span / (n - 1) as f64 } else { 0.0 };
        let bucket = span / n as f64;
        let prices: Vec<f64> = (0..n)
            .map(|i| if n > 1 { range.min + step * i as f64 } else { range.min + span / 2.0 })
            .collect();

        let intensities: Vec<f64> = prices.iter().map(|&p| intensity_at(p, zones)).collect();

        let counts: Vec<usize> = prices
            .iter()
            .map(|&p| {
                book.levels()
                    .filter(|l| l.is_well_formed() && (l.price - p).abs() <= bucket)
                    .count()
            })
            .collect();
        let max_count = counts.iter().copied().max().unwrap_or(0);

        (0..n)
            .map(|i| {
                let density = if max_count > 0 {
                    counts[i] as f64 / max_count as f64
                } else {
                    0.0
                };
                let intensity = intensities[i];
                HeatmapPoint {
                    price: prices[i],
                    intensity,
                    density,
                    gradient: gradient_at(&intensities, i),
                    risk_level: RiskLevel::classify(intensity, density),
                }
            })
            .collect()
    }

    /// One segment per zone.
    pub fn gradient_overlay(&self, zones: &[Zone]) -> Vec<GradientSegment> {
        zones
            .iter()
            .map(|zone| GradientSegment {
                zone_id: zone.id.clone(),
                min_price: zone.min_price,
                max_price: zone.max_price,
                center_price: zone.center_price,
                pressure_type: zone.pressure_type,
                // An inverted range yields max_opacity
                opacity: zone.intensity.max(self.config.min_opacity).min(self.config.max_opacity),
                color: self.config.color(zone.pressure_type).to_string(),
            })
            .collect()
    }
}

fn intensity_at(price: f64, zones: &[Zone]) -> f64 {
    let total: f64 = zones
        .iter()
        .filter(|z| z.contains(price))
        .map(|z| {
            let half_width = z.width() / 2.0;
            if half_width > 0.0 {
                let d = (price - z.center_price) / half_width;
                z.intensity * (1.0 - d * d).max(0.0)
            } else if price == z.center_price {
                z.intensity
            } else {
                0.0
            }
        })
        .sum();
    clamp01(total)
}

fn gradient_at(values: &[f64], i: usize) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    if i == 0 {
        values[1] - values[0]
    } else if i == n - 1 {
        values[n - 1] - values[n - 2]
    } else {
        (values[i + 1] - values[i - 1]) / 2.0
    }
}
