// Collision shape synthesis from visual geometry

mod decompose;
mod geometry;
mod mask;

pub use decompose::{decompose_convex, triangulate};
pub use geometry::{
    centroid, dedup_points, ensure_ccw, flatten_circle, flatten_subpaths, is_convex, is_simple,
    point_in_polygon, polygon_area, signed_area, CubicBezier, VisualGeometry,
};
pub use mask::{AlphaMask, ImageMaskOptions};

use glam::Vec2;

/// Shape synthesis errors
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for ShapeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => ShapeError::Io(io),
            other => ShapeError::ImageDecode(other.to_string()),
        }
    }
}

/// How an outline becomes collision geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Filled area: convex polygons, circles
    #[default]
    Solid,

    /// The outline only, as thick line segments
    Hollow,
}

/// Collision geometry for one visual object, in the object's local frame
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDescriptor {
    /// Circle centred on the local origin
    Circle { radius: f32 },

    /// One convex polygon, counter-clockwise
    Solid { vertices: Vec<Vec2>, radius: f32 },

    /// Line segments with a thickness (segment shapes of radius `thickness / 2`)
    Hollow {
        segments: Vec<[Vec2; 2]>,
        thickness: f32,
    },

    /// Convex pieces of the outlines extracted from an image
    ImageMask {
        polygons: Vec<Vec<Vec2>>,
        radius: f32,
    },

    /// Convex partition of one concave outline
    Decomposed {
        polygons: Vec<Vec<Vec2>>,
        radius: f32,
    },
}

impl ShapeDescriptor {
    /// Number of physics shapes this descriptor turns into
    pub fn shape_count(&self) -> usize {
        match self {
            ShapeDescriptor::Circle { .. } | ShapeDescriptor::Solid { .. } => 1,
            ShapeDescriptor::Hollow { segments, .. } => segments.len(),
            ShapeDescriptor::ImageMask { polygons, .. }
            | ShapeDescriptor::Decomposed { polygons, .. } => polygons.len(),
        }
    }

    /// Enclosed area (zero for hollow outlines)
    pub fn area(&self) -> f64 {
        match self {
            ShapeDescriptor::Circle { radius } => std::f64::consts::PI * (*radius as f64).powi(2),
            ShapeDescriptor::Solid { vertices, .. } => polygon_area(vertices),
            ShapeDescriptor::Hollow { .. } => 0.0,
            ShapeDescriptor::ImageMask { polygons, .. }
            | ShapeDescriptor::Decomposed { polygons, .. } => {
                polygons.iter().map(|p| polygon_area(p)).sum()
            }
        }
    }
}

/// Tuning for shape synthesis
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Maximum distance between a curve and its sampled polyline
    pub flatness_tolerance: f32,

    /// Relative slack when accepting merged convex pieces
    pub decomposition_tolerance: f32,

    /// Consecutive points closer than this are merged
    pub dedup_epsilon: f32,

    /// Overrides the geometry's own stroke width when set
    pub stroke_width: Option<f32>,

    pub image: ImageMaskOptions,

    /// Rounding radius given to polygons extracted from images
    pub image_radius: f32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            flatness_tolerance: 0.01,
            decomposition_tolerance: 1e-4,
            dedup_epsilon: 1e-3,
            stroke_width: None,
            image: ImageMaskOptions::default(),
            image_radius: 0.0,
        }
    }
}

/// Turns visual geometry into collision shape descriptors
#[derive(Debug, Clone, Default)]
pub struct ShapeBuilder {
    options: BuildOptions,
}

impl ShapeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build collision shapes for `geometry`.
    ///
    /// Never returns an empty list: unbuildable input is a
    /// [`ShapeError::DegenerateGeometry`].
    pub fn build(
        &self,
        geometry: &VisualGeometry,
        mode: BuildMode,
    ) -> Result<Vec<ShapeDescriptor>, ShapeError> {
        let stroke = self
            .options
            .stroke_width
            .unwrap_or_else(|| geometry.stroke_width())
            .max(0.0);

        let descriptors = match (geometry, mode) {
            (VisualGeometry::Circle { radius, .. }, BuildMode::Solid) => {
                let radius = radius + stroke / 2.0;
                if !(radius > 0.0) {
                    return Err(degenerate("circle has no radius"));
                }
                vec![ShapeDescriptor::Circle { radius }]
            }
            (VisualGeometry::Circle { radius, .. }, BuildMode::Hollow) => {
                if !(*radius > 0.0) {
                    return Err(degenerate("circle has no radius"));
                }
                let points = flatten_circle(*radius, self.options.flatness_tolerance);
                vec![self.hollow(&[points], stroke)?]
            }
            (VisualGeometry::Line { start, end, .. }, _) => {
                if start.distance(*end) <= self.options.dedup_epsilon {
                    return Err(degenerate("line has zero length"));
                }
                vec![ShapeDescriptor::Hollow {
                    segments: vec![[*start, *end]],
                    thickness: stroke,
                }]
            }
            (VisualGeometry::Polygon { vertices, .. }, BuildMode::Solid) => {
                vec![self.solid(vertices)?]
            }
            (VisualGeometry::Polygon { vertices, .. }, BuildMode::Hollow) => {
                vec![self.hollow(std::slice::from_ref(vertices), stroke)?]
            }
            (VisualGeometry::Path { subpaths, .. }, BuildMode::Solid) => {
                let outlines = flatten_subpaths(subpaths, self.options.flatness_tolerance);
                if outlines.is_empty() {
                    return Err(degenerate("path has no segments"));
                }
                outlines
                    .iter()
                    .map(|outline| self.solid(outline))
                    .collect::<Result<Vec<_>, _>>()?
            }
            (VisualGeometry::Path { subpaths, .. }, BuildMode::Hollow) => {
                let outlines = flatten_subpaths(subpaths, self.options.flatness_tolerance);
                vec![self.hollow(&outlines, stroke)?]
            }
            (VisualGeometry::Image { mask, size }, mode) => {
                vec![self.image(mask, *size, mode, stroke)?]
            }
        };

        log::debug!(
            "Built {} shape descriptor(s) ({} physics shapes)",
            descriptors.len(),
            descriptors.iter().map(|d| d.shape_count()).sum::<usize>()
        );
        Ok(descriptors)
    }

    /// Prepare a closed outline: dedupe, reject degenerate loops, orient CCW
    fn outline(&self, points: &[Vec2]) -> Result<Vec<Vec2>, ShapeError> {
        let mut outline = dedup_points(points, self.options.dedup_epsilon);
        if outline.len() < 3 {
            return Err(degenerate(format!(
                "outline has {} distinct point(s)",
                outline.len()
            )));
        }
        let area = polygon_area(&outline);
        if area <= (self.options.dedup_epsilon as f64).powi(2) {
            return Err(degenerate(format!("outline encloses area {}", area)));
        }
        ensure_ccw(&mut outline);
        Ok(outline)
    }

    /// One filled outline as a single convex polygon or its convex partition
    fn solid(&self, points: &[Vec2]) -> Result<ShapeDescriptor, ShapeError> {
        let outline = self.outline(points)?;
        if is_convex(&outline, self.options.decomposition_tolerance) {
            return Ok(ShapeDescriptor::Solid {
                vertices: outline,
                radius: 0.0,
            });
        }
        Ok(ShapeDescriptor::Decomposed {
            polygons: self.convex_pieces(&outline),
            radius: 0.0,
        })
    }

    /// Convex pieces of a CCW outline, falling back to its hull
    fn convex_pieces(&self, outline: &[Vec2]) -> Vec<Vec<Vec2>> {
        if is_convex(outline, self.options.decomposition_tolerance) {
            return vec![outline.to_vec()];
        }
        if is_simple(outline) {
            if let Some(pieces) = decompose_convex(outline, self.options.decomposition_tolerance) {
                if !pieces.is_empty() {
                    return pieces;
                }
            }
        }
        log::warn!(
            "Convex decomposition failed for a {}-point outline, using its convex hull",
            outline.len()
        );
        vec![convex_hull(outline)]
    }

    fn hollow(
        &self,
        outlines: &[Vec<Vec2>],
        thickness: f32,
    ) -> Result<ShapeDescriptor, ShapeError> {
        let mut segments = Vec::new();
        for outline in outlines {
            let points = dedup_points(outline, self.options.dedup_epsilon);
            if points.len() < 2 {
                continue;
            }
            let closing = if points.len() > 2 { points.len() } else { 1 };
            for i in 0..closing {
                let (a, b) = (points[i], points[(i + 1) % points.len()]);
                if a.distance(b) > self.options.dedup_epsilon {
                    segments.push([a, b]);
                }
            }
        }
        if segments.is_empty() {
            return Err(degenerate("outline has fewer than 2 distinct points"));
        }
        Ok(ShapeDescriptor::Hollow {
            segments,
            thickness,
        })
    }

    fn image(
        &self,
        mask: &AlphaMask,
        size: Vec2,
        mode: BuildMode,
        stroke: f32,
    ) -> Result<ShapeDescriptor, ShapeError> {
        if !(size.x > 0.0 && size.y > 0.0) {
            return Err(degenerate(format!("image size {} has no area", size)));
        }

        let mut outlines: Vec<Vec<Vec2>> = mask
            .extract_contours(&self.options.image)
            .into_iter()
            .map(|contour| {
                let mut local: Vec<Vec2> = contour
                    .into_iter()
                    .map(|p| mask.pixel_to_local(p, size))
                    .collect();
                ensure_ccw(&mut local);
                local
            })
            .filter(|outline| polygon_area(outline) > (self.options.dedup_epsilon as f64).powi(2))
            .collect();

        if outlines.is_empty() {
            log::warn!(
                "No opaque region found in {}x{} image, using its bounding box",
                mask.width(),
                mask.height()
            );
            let half = size / 2.0;
            outlines.push(vec![
                Vec2::new(-half.x, -half.y),
                Vec2::new(half.x, -half.y),
                Vec2::new(half.x, half.y),
                Vec2::new(-half.x, half.y),
            ]);
        }

        if mode == BuildMode::Hollow {
            return self.hollow(&outlines, stroke);
        }

        let polygons = outlines
            .iter()
            .flat_map(|outline| self.convex_pieces(outline))
            .collect();
        Ok(ShapeDescriptor::ImageMask {
            polygons,
            radius: self.options.image_radius,
        })
    }
}

fn degenerate(reason: impl Into<String>) -> ShapeError {
    ShapeError::DegenerateGeometry(reason.into())
}

fn convex_hull(points: &[Vec2]) -> Vec<Vec2> {
    let points: Vec<_> = points
        .iter()
        .map(|p| parry2d::math::Point::new(p.x, p.y))
        .collect();
    let mut hull: Vec<Vec2> = parry2d::transformation::convex_hull(&points)
        .iter()
        .map(|p| Vec2::new(p.x, p.y))
        .collect();
    ensure_ccw(&mut hull);
    hull
}
