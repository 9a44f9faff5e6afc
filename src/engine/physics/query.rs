// Spatial queries over bound shapes

use glam::Vec2;
use rapier2d::parry::query::{self, PointQuery, Ray, RayCast};
use rapier2d::parry::shape::Capsule;
use rapier2d::prelude::{Collider, ColliderHandle, Isometry, Real};

use super::registry::{BindingError, BodyRegistry};
use super::world::PhysicsWorld;
use crate::core::math::{from_point, from_vector, to_point, to_vector};
use crate::engine::scene::VisualId;

/// Nearest point on a shape's surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointHit {
    pub visual_id: VisualId,
    pub shape: ColliderHandle,
    /// Closest point on the shape's boundary, world space
    pub point: Vec2,
    /// Distance to `point`, negative when the query point is inside
    pub distance: f32,
    /// Unit direction in which `distance` grows, pointing out of the shape
    pub gradient: Vec2,
}

/// First shape crossed by a segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHit {
    pub visual_id: VisualId,
    pub shape: ColliderHandle,
    pub point: Vec2,
    /// Surface normal at `point`
    pub normal: Vec2,
    /// Fraction of the segment travelled before the hit, in `[0, 1]`
    pub alpha: f32,
}

/// One contact between shapes of two bodies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    pub point_a: Vec2,
    pub point_b: Vec2,
    /// Points from A towards B
    pub normal: Vec2,
    /// Negative when the shapes overlap
    pub distance: f32,
}

fn project(
    visual_id: VisualId,
    shape: ColliderHandle,
    collider: &Collider,
    point: Vec2,
) -> PointHit {
    let p = to_point(point);
    let projection = collider
        .shape()
        .project_point(collider.position(), &p, false);
    let nearest = from_point(&projection.point);
    let distance = nearest.distance(point);
    let (distance, gradient) = if distance > 1e-6 {
        let away = (point - nearest) / distance;
        if projection.is_inside {
            (-distance, -away)
        } else {
            (distance, away)
        }
    } else {
        // On the surface: fall back to the direction from the shape's origin
        let center = from_vector(&collider.position().translation.vector);
        (0.0, (nearest - center).normalize_or_zero())
    };
    PointHit {
        visual_id,
        shape,
        point: nearest,
        distance,
        gradient,
    }
}

fn cast(collider: &Collider, start: Vec2, end: Vec2) -> Option<(Vec2, Real)> {
    let ray = Ray::new(to_point(start), to_vector(end - start));
    collider
        .shape()
        .cast_ray_and_get_normal(collider.position(), &ray, 1.0, true)
        .map(|hit| (from_vector(&hit.normal), hit.time_of_impact))
}

/// Point query against one binding; `None` when the point lies outside every shape
pub fn point_query(
    world: &PhysicsWorld,
    registry: &BodyRegistry,
    id: VisualId,
    point: Vec2,
) -> Result<Option<PointHit>, BindingError> {
    Ok(point_query_info(world, registry, id, point)?
        .into_iter()
        .filter(|hit| hit.distance <= 0.0)
        .min_by(|a, b| a.distance.total_cmp(&b.distance)))
}

/// Signed distance, nearest point and gradient for every shape of one binding,
/// in shape order, whether `point` lies inside or not
pub fn point_query_info(
    world: &PhysicsWorld,
    registry: &BodyRegistry,
    id: VisualId,
    point: Vec2,
) -> Result<Vec<PointHit>, BindingError> {
    let binding = registry.get(id)?;
    Ok(binding
        .shapes()
        .iter()
        .filter_map(|h| world.get_collider(*h).map(|c| project(id, *h, c, point)))
        .collect())
}

/// Segment query against one binding, swept by `radius` when positive
pub fn line_query(
    world: &PhysicsWorld,
    registry: &BodyRegistry,
    id: VisualId,
    start: Vec2,
    end: Vec2,
    radius: f32,
) -> Result<Option<SegmentHit>, BindingError> {
    let binding = registry.get(id)?;
    let colliders: Vec<(ColliderHandle, &Collider)> = binding
        .shapes()
        .iter()
        .filter_map(|h| world.get_collider(*h).map(|c| (*h, c)))
        .collect();

    let ray_hit = colliders
        .iter()
        .filter_map(|(h, c)| cast(c, start, end).map(|(normal, alpha)| (*h, normal, alpha)))
        .min_by(|a, b| a.2.total_cmp(&b.2));
    if let Some((shape, normal, alpha)) = ray_hit {
        return Ok(Some(SegmentHit {
            visual_id: id,
            shape,
            point: start + (end - start) * alpha,
            normal,
            alpha,
        }));
    }
    if radius <= 0.0 {
        return Ok(None);
    }

    // The ray missed; look for the swept segment grazing a shape
    let capsule = Capsule::new(to_point(start), to_point(end), radius);
    let identity = Isometry::identity();
    let length_squared = (end - start).length_squared();
    let hit = colliders
        .iter()
        .filter_map(|(h, c)| {
            let contact = query::contact(&identity, &capsule, c.position(), c.shape(), 0.0).ok()??;
            let point = from_point(&contact.point2);
            let alpha = if length_squared > 0.0 {
                ((point - start).dot(end - start) / length_squared).clamp(0.0, 1.0)
            } else {
                0.0
            };
            Some((*h, point, from_vector(&contact.normal2), alpha))
        })
        .min_by(|a, b| a.3.total_cmp(&b.3));

    Ok(hit.map(|(shape, point, normal, alpha)| SegmentHit {
        visual_id: id,
        shape,
        point,
        normal,
        alpha,
    }))
}

/// Closest bound shape to `point` within `max_distance`
pub fn nearest_point_query(
    world: &PhysicsWorld,
    registry: &BodyRegistry,
    point: Vec2,
    max_distance: f32,
) -> Option<PointHit> {
    world
        .colliders()
        .iter()
        .filter_map(|(h, c)| {
            let owner = registry.owner_of(h)?;
            let hit = project(owner.visual, h, c, point);
            (hit.distance <= max_distance).then_some(hit)
        })
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

/// First bound, non-sensor shape hit by the segment `start..end`
pub fn raycast(
    world: &PhysicsWorld,
    registry: &BodyRegistry,
    start: Vec2,
    end: Vec2,
) -> Option<SegmentHit> {
    world
        .colliders()
        .iter()
        .filter(|(_, c)| !c.is_sensor())
        .filter_map(|(h, c)| {
            let owner = registry.owner_of(h)?;
            let (normal, alpha) = cast(c, start, end)?;
            Some(SegmentHit {
                visual_id: owner.visual,
                shape: h,
                point: start + (end - start) * alpha,
                normal,
                alpha,
            })
        })
        .min_by(|a, b| a.alpha.total_cmp(&b.alpha))
}

/// Touching or overlapping points between the shapes of `a` and `b`
pub fn shape_contacts(
    world: &PhysicsWorld,
    registry: &BodyRegistry,
    a: VisualId,
    b: VisualId,
) -> Result<Vec<ContactPoint>, BindingError> {
    let shapes_a = registry.get(a)?.shapes();
    let shapes_b = registry.get(b)?.shapes();

    let mut contacts = Vec::new();
    for ca in shapes_a.iter().filter_map(|h| world.get_collider(*h)) {
        for cb in shapes_b.iter().filter_map(|h| world.get_collider(*h)) {
            let Ok(Some(contact)) =
                query::contact(ca.position(), ca.shape(), cb.position(), cb.shape(), 0.0)
            else {
                continue;
            };
            contacts.push(ContactPoint {
                point_a: from_point(&contact.point1),
                point_b: from_point(&contact.point2),
                normal: from_vector(&contact.normal1),
                distance: contact.dist,
            });
        }
    }
    Ok(contacts)
}
