// Outline extraction from raster opacity data

use super::geometry::{dedup_points, point_in_polygon};
use super::ShapeError;
use glam::Vec2;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Alpha below this counts as transparent when deciding which mask source to use
const TRANSPARENT_ALPHA: u8 = 32;

/// Minimum samples per axis of the marching grid
const MIN_GRID_SAMPLES: usize = 20;

/// Per-pixel opacity (and luminance) of an image
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMask {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
    luma: Option<Vec<u8>>,
}

/// Tuning for image-mask extraction
#[derive(Debug, Clone, Copy)]
pub struct ImageMaskOptions {
    /// Alpha (or contrast) level separating opaque from transparent pixels
    pub alpha_threshold: u8,

    /// Marching squares cell size, in working-resolution pixels
    pub cell_size: f32,

    /// Images wider than this are sampled as if downscaled to it
    pub working_width: f32,

    /// Contour simplification tolerance, in grid cells
    pub simplify_tolerance: f32,

    /// Fraction of transparent pixels required to trust the alpha channel
    pub transparent_ratio: f32,
}

impl Default for ImageMaskOptions {
    fn default() -> Self {
        Self {
            alpha_threshold: 128,
            cell_size: 4.0,
            working_width: 512.0,
            simplify_tolerance: 0.4,
            transparent_ratio: 0.1,
        }
    }
}

impl AlphaMask {
    /// Build a mask from raw row-major alpha bytes
    pub fn from_alpha(width: u32, height: u32, alpha: Vec<u8>) -> Result<Self, ShapeError> {
        if width == 0 || height == 0 || alpha.len() != (width as usize) * (height as usize) {
            return Err(ShapeError::DegenerateGeometry(format!(
                "alpha buffer of {} bytes does not describe a {}x{} image",
                alpha.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            alpha,
            luma: None,
        })
    }

    /// Build a mask from a decoded image, keeping luminance for opaque images
    pub fn from_image(image: &image::DynamicImage) -> Result<Self, ShapeError> {
        let la = image.to_luma_alpha8();
        let (width, height) = la.dimensions();
        let mut alpha = Vec::with_capacity((width * height) as usize);
        let mut luma = Vec::with_capacity((width * height) as usize);
        for pixel in la.pixels() {
            luma.push(pixel.0[0]);
            alpha.push(pixel.0[1]);
        }
        let mut mask = Self::from_alpha(width, height, alpha)?;
        mask.luma = Some(luma);
        Ok(mask)
    }

    /// Load and decode an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ShapeError> {
        let image = image::open(path.as_ref())?;
        Self::from_image(&image)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn transparent_fraction(&self) -> f32 {
        let transparent = self.alpha.iter().filter(|&&a| a < TRANSPARENT_ALPHA).count();
        transparent as f32 / self.alpha.len() as f32
    }

    /// Binary opaque/transparent mask at full resolution
    fn binary(&self, options: &ImageMaskOptions) -> Vec<bool> {
        match &self.luma {
            Some(luma) if self.transparent_fraction() <= options.transparent_ratio => {
                contrast_mask(luma, self.width as usize, self.height as usize)
            }
            _ => self
                .alpha
                .iter()
                .map(|&a| a >= options.alpha_threshold)
                .collect(),
        }
    }

    /// Extract closed outer contours of the opaque regions.
    ///
    /// Points are in pixel coordinates (x right, y down). Holes are dropped.
    pub fn extract_contours(&self, options: &ImageMaskOptions) -> Vec<Vec<Vec2>> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mask = close(&self.binary(options), w, h);

        let working = options.working_width.max(1.0).min(w as f32);
        let scale = w as f32 / working;
        let samples_x = ((working / options.cell_size.max(1.0)) as usize)
            .max(MIN_GRID_SAMPLES)
            .min(w);
        let samples_y = ((h as f32 / scale / options.cell_size.max(1.0)) as usize)
            .max(MIN_GRID_SAMPLES)
            .min(h);
        let cell = Vec2::new(w as f32 / samples_x as f32, h as f32 / samples_y as f32);

        let grid = sample_grid(&mask, w, h, samples_x, samples_y);
        let loops = march(&grid, samples_x, samples_y);

        let tolerance = options.simplify_tolerance * cell.min_element();
        let outlines: Vec<Vec<Vec2>> = loops
            .into_iter()
            .map(|keys| {
                keys.into_iter()
                    .map(|(kx, ky)| {
                        // Padded corner coordinates, sample (0,0) sits at corner (1,1)
                        let corner = Vec2::new(kx as f32 / 2.0, ky as f32 / 2.0);
                        (corner - Vec2::splat(0.5)) * cell
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let holes: Vec<bool> = outlines
            .iter()
            .enumerate()
            .map(|(i, outline)| {
                let depth = outlines
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| *j != i && point_in_polygon(outline[0], other))
                    .count();
                depth % 2 == 1
            })
            .collect();

        outlines
            .into_iter()
            .zip(holes)
            .filter(|(_, hole)| !hole)
            .map(|(outline, _)| simplify_closed(&outline, tolerance))
            .map(|outline| dedup_points(&outline, 1e-4))
            .filter(|outline| outline.len() >= 3)
            .collect()
    }

    /// Map a pixel-space point into the local frame of an image displayed at `size`
    pub fn pixel_to_local(&self, pixel: Vec2, size: Vec2) -> Vec2 {
        Vec2::new(
            (pixel.x / self.width as f32 - 0.5) * size.x,
            (0.5 - pixel.y / self.height as f32) * size.y,
        )
    }
}

/// Opaque where luminance departs from the median border colour
fn contrast_mask(luma: &[u8], w: usize, h: usize) -> Vec<bool> {
    let mut border: Vec<u8> = Vec::with_capacity(2 * (w + h));
    border.extend_from_slice(&luma[..w]);
    border.extend_from_slice(&luma[(h - 1) * w..]);
    for y in 0..h {
        border.push(luma[y * w]);
        border.push(luma[y * w + w - 1]);
    }
    border.sort_unstable();
    let median = border[border.len() / 2] as f32;
    let mean = border.iter().map(|&v| v as f32).sum::<f32>() / border.len() as f32;
    let variance =
        border.iter().map(|&v| (v as f32 - mean).powi(2)).sum::<f32>() / border.len() as f32;
    let threshold = (variance.sqrt() * 3.0).max(10.0);

    luma.iter()
        .map(|&v| (v as f32 - median).abs() > threshold)
        .collect()
}

/// Morphological close (3x3 dilate then 3x3 erode) to join broken regions
fn close(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
    let dilated = filter3(mask, w, h, |window| window.iter().any(|&v| v));
    filter3(&dilated, w, h, |window| window.iter().all(|&v| v))
}

fn filter3(mask: &[bool], w: usize, h: usize, op: impl Fn(&[bool]) -> bool) -> Vec<bool> {
    let mut out = vec![false; mask.len()];
    let mut window = Vec::with_capacity(9);
    for y in 0..h {
        for x in 0..w {
            window.clear();
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h {
                        window.push(mask[ny as usize * w + nx as usize]);
                    }
                }
            }
            out[y * w + x] = op(&window);
        }
    }
    out
}

/// Fraction of opaque pixels in each grid cell
fn sample_grid(mask: &[bool], w: usize, h: usize, sx: usize, sy: usize) -> Vec<f32> {
    let mut grid = vec![0.0; sx * sy];
    for gy in 0..sy {
        let y0 = gy * h / sy;
        let y1 = ((gy + 1) * h / sy).max(y0 + 1);
        for gx in 0..sx {
            let x0 = gx * w / sx;
            let x1 = ((gx + 1) * w / sx).max(x0 + 1);
            let mut opaque = 0usize;
            for y in y0..y1 {
                for x in x0..x1 {
                    if mask[y * w + x] {
                        opaque += 1;
                    }
                }
            }
            grid[gy * sx + gx] = opaque as f32 / ((y1 - y0) * (x1 - x0)) as f32;
        }
    }
    grid
}

type EdgeKey = (i64, i64);

/// Marching squares over a zero-padded grid, returning closed loops of edge keys.
///
/// Keys are doubled corner coordinates of the padded grid so that edge
/// midpoints are integral and shared between neighbouring cells.
fn march(grid: &[f32], sx: usize, sy: usize) -> Vec<Vec<EdgeKey>> {
    let value = |x: i64, y: i64| -> f32 {
        // Padded corner (x, y) holds sample (x - 1, y - 1)
        if x < 1 || y < 1 || x as usize > sx || y as usize > sy {
            0.0
        } else {
            grid[(y as usize - 1) * sx + (x as usize - 1)]
        }
    };

    let mut adjacency: BTreeMap<EdgeKey, Vec<EdgeKey>> = BTreeMap::new();
    let mut link = |a: EdgeKey, b: EdgeKey| {
        adjacency.entry(a).or_default().push(b);
        adjacency.entry(b).or_default().push(a);
    };

    for cy in 0..=(sy as i64) {
        for cx in 0..=(sx as i64) {
            let tl = value(cx, cy);
            let tr = value(cx + 1, cy);
            let br = value(cx + 1, cy + 1);
            let bl = value(cx, cy + 1);
            let case = ((tl >= 0.5) as u8) << 3
                | ((tr >= 0.5) as u8) << 2
                | ((br >= 0.5) as u8) << 1
                | (bl >= 0.5) as u8;

            let top = (2 * cx + 1, 2 * cy);
            let bottom = (2 * cx + 1, 2 * cy + 2);
            let left = (2 * cx, 2 * cy + 1);
            let right = (2 * cx + 2, 2 * cy + 1);
            let center_inside = (tl + tr + br + bl) / 4.0 >= 0.5;

            match case {
                1 | 14 => link(left, bottom),
                2 | 13 => link(bottom, right),
                3 | 12 => link(left, right),
                4 | 11 => link(top, right),
                6 | 9 => link(top, bottom),
                7 | 8 => link(left, top),
                5 => {
                    if center_inside {
                        link(left, top);
                        link(bottom, right);
                    } else {
                        link(left, bottom);
                        link(top, right);
                    }
                }
                10 => {
                    if center_inside {
                        link(top, right);
                        link(left, bottom);
                    } else {
                        link(left, top);
                        link(bottom, right);
                    }
                }
                _ => {}
            }
        }
    }

    let mut visited: BTreeSet<EdgeKey> = BTreeSet::new();
    let mut loops = Vec::new();
    for (&start, neighbours) in &adjacency {
        if visited.contains(&start) || neighbours.len() != 2 {
            continue;
        }
        let mut contour = vec![start];
        visited.insert(start);
        let mut prev = start;
        let mut current = neighbours[0];
        let mut closed = false;
        for _ in 0..adjacency.len() {
            if current == start {
                closed = true;
                break;
            }
            contour.push(current);
            visited.insert(current);
            let Some(next) = adjacency.get(&current) else {
                break;
            };
            if next.len() != 2 {
                break;
            }
            let step = if next[0] != prev { next[0] } else { next[1] };
            prev = current;
            current = step;
        }
        if closed && contour.len() >= 3 {
            loops.push(contour);
        }
    }
    loops
}

/// Ramer-Douglas-Peucker on a closed loop
fn simplify_closed(points: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    if points.len() < 4 {
        return points.to_vec();
    }
    let first = points[0];
    let (far, _) = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, p.distance_squared(first)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
    if far == 0 {
        return points.to_vec();
    }

    let mut second_half: Vec<Vec2> = points[far..].to_vec();
    second_half.push(first);

    let mut out = rdp(&points[..=far], tolerance);
    out.pop();
    let mut tail = rdp(&second_half, tolerance);
    tail.pop();
    out.extend(tail);
    out
}

fn rdp(points: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let (a, b) = (points[0], points[points.len() - 1]);
    let mut max_dist = 0.0;
    let mut index = 0;
    for (i, &p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = distance_to_segment(p, a, b);
        if d > max_dist {
            max_dist = d;
            index = i;
        }
    }
    if max_dist <= tolerance {
        return vec![a, b];
    }
    let mut left = rdp(&points[..=index], tolerance);
    left.pop();
    left.extend(rdp(&points[index..], tolerance));
    left
}

fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::shapes::geometry::polygon_area;

    fn disc_mask(size: u32, radius: f32) -> AlphaMask {
        let c = size as f32 / 2.0;
        let alpha = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as f32 + 0.5, (i / size) as f32 + 0.5);
                if (x - c).hypot(y - c) <= radius {
                    255
                } else {
                    0
                }
            })
            .collect();
        AlphaMask::from_alpha(size, size, alpha).unwrap()
    }

    #[test]
    fn test_rejects_mismatched_buffer() {
        assert!(AlphaMask::from_alpha(4, 4, vec![0; 15]).is_err());
        assert!(AlphaMask::from_alpha(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_disc_yields_one_contour() {
        let mask = disc_mask(64, 20.0);
        let contours = mask.extract_contours(&ImageMaskOptions::default());
        assert_eq!(contours.len(), 1);

        let area = polygon_area(&contours[0]) as f32;
        let expected = std::f32::consts::PI * 20.0 * 20.0;
        assert!((area - expected).abs() / expected < 0.15, "area {}", area);
    }

    #[test]
    fn test_ring_hole_is_dropped() {
        let size = 64u32;
        let c = size as f32 / 2.0;
        let alpha = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as f32 + 0.5, (i / size) as f32 + 0.5);
                let r = (x - c).hypot(y - c);
                if (12.0..=26.0).contains(&r) {
                    255
                } else {
                    0
                }
            })
            .collect();
        let mask = AlphaMask::from_alpha(size, size, alpha).unwrap();
        let contours = mask.extract_contours(&ImageMaskOptions::default());
        assert_eq!(contours.len(), 1);
    }

    #[test]
    fn test_two_blobs() {
        let (w, h) = (80u32, 40u32);
        let alpha = (0..w * h)
            .map(|i| {
                let x = i % w;
                let y = i / w;
                let in_left = (8..30).contains(&x) && (8..32).contains(&y);
                let in_right = (50..72).contains(&x) && (8..32).contains(&y);
                if in_left || in_right {
                    255
                } else {
                    0
                }
            })
            .collect();
        let mask = AlphaMask::from_alpha(w, h, alpha).unwrap();
        let contours = mask.extract_contours(&ImageMaskOptions::default());
        assert_eq!(contours.len(), 2);
    }

    #[test]
    fn test_empty_mask_has_no_contours() {
        let mask = AlphaMask::from_alpha(32, 32, vec![0; 32 * 32]).unwrap();
        assert!(mask.extract_contours(&ImageMaskOptions::default()).is_empty());
    }

    #[test]
    fn test_opaque_image_uses_contrast() {
        // Fully opaque image: dark square on a light background
        let size = 48u32;
        let mut img = image::RgbaImage::new(size, size);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let dark = (12..36).contains(&x) && (12..36).contains(&y);
            let v = if dark { 20 } else { 230 };
            *pixel = image::Rgba([v, v, v, 255]);
        }
        let mask = AlphaMask::from_image(&image::DynamicImage::ImageRgba8(img)).unwrap();
        let contours = mask.extract_contours(&ImageMaskOptions::default());
        assert_eq!(contours.len(), 1);
    }

    #[test]
    fn test_pixel_to_local_flips_y() {
        let mask = AlphaMask::from_alpha(100, 50, vec![0; 5000]).unwrap();
        let size = Vec2::new(4.0, 2.0);
        assert_eq!(mask.pixel_to_local(Vec2::new(0.0, 0.0), size), Vec2::new(-2.0, 1.0));
        assert_eq!(mask.pixel_to_local(Vec2::new(100.0, 50.0), size), Vec2::new(2.0, -1.0));
    }

    #[test]
    fn test_simplify_square_loop() {
        let mut pts = Vec::new();
        for i in 0..10 {
            pts.push(Vec2::new(i as f32, 0.0));
        }
        for i in 0..10 {
            pts.push(Vec2::new(10.0, i as f32));
        }
        for i in 0..10 {
            pts.push(Vec2::new(10.0 - i as f32, 10.0));
        }
        for i in 0..10 {
            pts.push(Vec2::new(0.0, 10.0 - i as f32));
        }
        let simplified = simplify_closed(&pts, 0.1);
        assert_eq!(simplified.len(), 4);
    }
}
