//! CAPTCHA image preprocessing.
//!
//! The code glyphs may be any color, rotated, anti-aliased or set against a
//! noisy background, so no single binarization is reliable. Five independent
//! strategy families each produce candidate renderings; the extractor picks
//! the winner downstream by confidence, not by family priority.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::contrast::{adaptive_threshold, otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::{close, dilate};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

/// Bounding-box window a connected component must fall inside to count as a
/// digit glyph (exclusive bounds).
pub const DIGIT_MIN_WIDTH: u32 = 8;
pub const DIGIT_MAX_WIDTH: u32 = 40;
pub const DIGIT_MIN_HEIGHT: u32 = 12;
pub const DIGIT_MAX_HEIGHT: u32 = 35;

/// Rotation below this magnitude is left alone.
const ROTATION_THRESHOLD_DEGREES: f32 = 5.0;

/// Adaptive threshold neighborhood radius (11px window).
const ADAPTIVE_BLOCK_RADIUS: u32 = 5;

/// Minimum component mass before its orientation is trusted.
const MIN_COMPONENT_PIXELS: f64 = 20.0;

/// The independent preprocessing strategy families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Grayscale, rotation correction, global Otsu threshold
    OtsuDeskew,
    /// Adaptive local threshold with morphological closing
    AdaptiveDenoise,
    /// Contrast-limited local equalization, then Otsu
    EqualizeOtsu,
    /// Blur, Canny edges, dilation
    EdgeMap,
    /// Per-channel thresholds with digit segmentation
    ChannelSegmentation,
}

impl Strategy {
    /// All families, in the order they are attempted.
    pub const ALL: [Strategy; 5] = [
        Strategy::OtsuDeskew,
        Strategy::AdaptiveDenoise,
        Strategy::EqualizeOtsu,
        Strategy::EdgeMap,
        Strategy::ChannelSegmentation,
    ];

    /// Short label for logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OtsuDeskew => "otsu-deskew",
            Self::AdaptiveDenoise => "adaptive-denoise",
            Self::EqualizeOtsu => "equalize-otsu",
            Self::EdgeMap => "edge-map",
            Self::ChannelSegmentation => "channel-segmentation",
        }
    }

    /// Apply this family to the captured image.
    #[must_use]
    pub fn apply(self, image: &RgbaImage) -> Vec<PreprocessingVariant> {
        match self {
            Self::OtsuDeskew => {
                let gray = deskew(&imageops::grayscale(image));
                let level = otsu_level(&gray);
                vec![PreprocessingVariant {
                    strategy: self,
                    kind: VariantKind::Whole(threshold(&gray, level, ThresholdType::Binary)),
                }]
            }
            Self::AdaptiveDenoise => {
                let gray = imageops::grayscale(image);
                let binary = adaptive_threshold(&gray, ADAPTIVE_BLOCK_RADIUS);
                vec![PreprocessingVariant {
                    strategy: self,
                    kind: VariantKind::Whole(close(&binary, Norm::LInf, 1)),
                }]
            }
            Self::EqualizeOtsu => {
                let gray = imageops::grayscale(image);
                let equalized = clahe(&gray, 3.0, 8);
                let level = otsu_level(&equalized);
                vec![PreprocessingVariant {
                    strategy: self,
                    kind: VariantKind::Whole(threshold(&equalized, level, ThresholdType::Binary)),
                }]
            }
            Self::EdgeMap => {
                let gray = imageops::grayscale(image);
                let blurred = gaussian_blur_f32(&gray, 1.0);
                let edges = canny(&blurred, 50.0, 150.0);
                vec![PreprocessingVariant {
                    strategy: self,
                    kind: VariantKind::Whole(dilate(&edges, Norm::LInf, 1)),
                }]
            }
            Self::ChannelSegmentation => segment_channels(image),
        }
    }
}

/// An isolated digit glyph, cropped from a binarized channel.
#[derive(Debug, Clone)]
pub struct DigitCell {
    /// Bounding-box x coordinate in the source image
    pub x: u32,
    /// Bounding-box y coordinate in the source image
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Cropped binary glyph
    pub image: GrayImage,
}

/// The payload of one preprocessing attempt.
#[derive(Debug, Clone)]
pub enum VariantKind {
    /// A full binarized rendering, for whole-image recognition
    Whole(GrayImage),
    /// Isolated digit glyphs ordered left to right, for per-digit recognition
    Digits(Vec<DigitCell>),
}

/// A (strategy, transformed rendering) pair.
#[derive(Debug, Clone)]
pub struct PreprocessingVariant {
    pub strategy: Strategy,
    pub kind: VariantKind,
}

/// Enumerate all preprocessing variants of a captured image.
///
/// The sequence is lazy per family, finite, and restartable: each call
/// recomputes from the immutable input, with no state shared between calls.
pub fn variants(image: &RgbaImage) -> impl Iterator<Item = PreprocessingVariant> + '_ {
    Strategy::ALL.into_iter().flat_map(|s| s.apply(image))
}

/// Estimate the dominant glyph orientation and rotate it out when it exceeds
/// the threshold. Orientation comes from the second-order central moments of
/// the largest dark connected component.
fn deskew(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    let mask = threshold(gray, level, ThresholdType::BinaryInverted);
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    #[derive(Default)]
    struct Moments {
        n: f64,
        sx: f64,
        sy: f64,
        sxx: f64,
        syy: f64,
        sxy: f64,
    }

    let mut components: HashMap<u32, Moments> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let id = label[0];
        if id == 0 {
            continue;
        }
        let m = components.entry(id).or_default();
        let (fx, fy) = (f64::from(x), f64::from(y));
        m.n += 1.0;
        m.sx += fx;
        m.sy += fy;
        m.sxx += fx * fx;
        m.syy += fy * fy;
        m.sxy += fx * fy;
    }

    let Some(m) = components
        .into_values()
        .max_by(|a, b| a.n.total_cmp(&b.n))
    else {
        return gray.clone();
    };
    if m.n < MIN_COMPONENT_PIXELS {
        return gray.clone();
    }

    let mu20 = m.sxx - m.sx * m.sx / m.n;
    let mu02 = m.syy - m.sy * m.sy / m.n;
    let mu11 = m.sxy - m.sx * m.sy / m.n;

    // Principal-axis orientation, folded into (-45°, 45°]: glyph skew is the
    // deviation from the nearest axis, not the axis direction itself.
    let mut degrees = (0.5 * (2.0 * mu11).atan2(mu20 - mu02)).to_degrees();
    while degrees > 45.0 {
        degrees -= 90.0;
    }
    while degrees < -45.0 {
        degrees += 90.0;
    }
    if degrees.abs() <= f64::from(ROTATION_THRESHOLD_DEGREES) {
        return gray.clone();
    }

    tracing::debug!(degrees, "correcting captcha rotation");
    #[allow(clippy::cast_possible_truncation)]
    let radians = degrees.to_radians() as f32;
    rotate_about_center(gray, -radians, Interpolation::Bicubic, Luma([255u8]))
}

/// Contrast-limited local histogram equalization over a tile grid, with
/// bilinear blending between neighboring tile lookup tables.
fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = grid.min(width).max(1);
    let tiles_y = grid.min(height).max(1);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let x1 = ((tx + 1) * tile_w).min(width);
            let y0 = ty * tile_h;
            let y1 = ((ty + 1) * tile_h).min(height);

            let mut hist = [0u32; 256];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }

            // Clip each bin and redistribute the excess uniformly
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let clip = (clip_limit * count as f32 / 256.0).max(1.0) as u32;
            let mut excess = 0u32;
            for bin in &mut hist {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256;
            for bin in &mut hist {
                *bin += bonus;
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (value, bin) in hist.iter().enumerate() {
                cdf += *bin;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    lut[value] = ((f64::from(cdf) / f64::from(count)) * 255.0).round() as u8;
                }
            }
        }
    }

    let tile_index = |tx: u32, ty: u32| (ty * tiles_x + tx) as usize;
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let value = gray.get_pixel(x, y)[0] as usize;

            let fx = (f64::from(x) + 0.5) / f64::from(tile_w) - 0.5;
            let fy = (f64::from(y) + 0.5) / f64::from(tile_h) - 0.5;
            let fx0 = fx.floor();
            let fy0 = fy.floor();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let tx0 = fx0.clamp(0.0, f64::from(tiles_x - 1)) as u32;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let tx1 = (fx0 + 1.0).clamp(0.0, f64::from(tiles_x - 1)) as u32;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ty0 = fy0.clamp(0.0, f64::from(tiles_y - 1)) as u32;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ty1 = (fy0 + 1.0).clamp(0.0, f64::from(tiles_y - 1)) as u32;
            let wx = (fx - fx0).clamp(0.0, 1.0);
            let wy = (fy - fy0).clamp(0.0, 1.0);

            let v00 = f64::from(luts[tile_index(tx0, ty0)][value]);
            let v10 = f64::from(luts[tile_index(tx1, ty0)][value]);
            let v01 = f64::from(luts[tile_index(tx0, ty1)][value]);
            let v11 = f64::from(luts[tile_index(tx1, ty1)][value]);
            let top = v00 * (1.0 - wx) + v10 * wx;
            let bottom = v01 * (1.0 - wx) + v11 * wx;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let blended = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;

            out.put_pixel(x, y, Luma([blended]));
        }
    }
    out
}

/// Family 5: per-channel extraction with digit segmentation.
fn segment_channels(image: &RgbaImage) -> Vec<PreprocessingVariant> {
    let channels: [(&str, GrayImage); 5] = [
        ("gray", imageops::grayscale(image)),
        ("red", extract_channel(image, |p| p[0])),
        ("green", extract_channel(image, |p| p[1])),
        ("blue", extract_channel(image, |p| p[2])),
        // HSV value separates hue-colored glyphs the weighted luma misses
        ("value", extract_channel(image, |p| p[0].max(p[1]).max(p[2]))),
    ];

    let mut out = Vec::new();
    for (name, channel) in &channels {
        let level = otsu_level(channel);
        let adaptive = adaptive_threshold(channel, ADAPTIVE_BLOCK_RADIUS);
        let mut adaptive_inverted = adaptive.clone();
        imageops::invert(&mut adaptive_inverted);

        let binarizations = [
            threshold(channel, level, ThresholdType::Binary),
            threshold(channel, level, ThresholdType::BinaryInverted),
            adaptive,
            adaptive_inverted,
        ];

        for binary in &binarizations {
            let cells = segment_digits(binary);
            if cells.is_empty() {
                continue;
            }
            tracing::trace!(channel = name, cells = cells.len(), "segmented digit candidates");
            out.push(PreprocessingVariant {
                strategy: Strategy::ChannelSegmentation,
                kind: VariantKind::Digits(cells),
            });
        }
    }
    out
}

fn extract_channel(image: &RgbaImage, pick: impl Fn(&Rgba<u8>) -> u8) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        out.put_pixel(x, y, Luma([pick(pixel)]));
    }
    out
}

/// Find digit-plausible connected components in a binary image and crop
/// them, ordered left to right.
pub fn segment_digits(binary: &GrayImage) -> Vec<DigitCell> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));

    struct Bounds {
        min_x: u32,
        max_x: u32,
        min_y: u32,
        max_y: u32,
    }

    let mut boxes: HashMap<u32, Bounds> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let id = label[0];
        if id == 0 {
            continue;
        }
        boxes
            .entry(id)
            .and_modify(|b| {
                b.min_x = b.min_x.min(x);
                b.max_x = b.max_x.max(x);
                b.min_y = b.min_y.min(y);
                b.max_y = b.max_y.max(y);
            })
            .or_insert(Bounds {
                min_x: x,
                max_x: x,
                min_y: y,
                max_y: y,
            });
    }

    let mut cells: Vec<DigitCell> = boxes
        .into_values()
        .filter_map(|b| {
            let width = b.max_x - b.min_x + 1;
            let height = b.max_y - b.min_y + 1;
            let plausible = width > DIGIT_MIN_WIDTH
                && width < DIGIT_MAX_WIDTH
                && height > DIGIT_MIN_HEIGHT
                && height < DIGIT_MAX_HEIGHT;
            plausible.then(|| DigitCell {
                x: b.min_x,
                y: b.min_y,
                width,
                height,
                image: imageops::crop_imm(binary, b.min_x, b.min_y, width, height).to_image(),
            })
        })
        .collect();

    cells.sort_by_key(|c| c.x);
    cells
}

/// Resize a glyph to the canvas the per-digit recognizer expects.
#[must_use]
pub fn normalize_cell(cell: &DigitCell) -> GrayImage {
    imageops::resize(&cell.image, 20, 30, FilterType::Triangle)
}
