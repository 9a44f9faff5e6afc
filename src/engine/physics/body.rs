use glam::Vec2;
use rapier2d::prelude::*;

use super::collision::CollisionFilter;
use crate::core::math::{to_point, to_vector};
use crate::engine::shapes::{polygon_area, ShapeDescriptor, ShapeError};

pub use rapier2d::prelude::{ColliderHandle, RigidBodyHandle};

/// How a body takes part in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// Simulated: mass and inertia come from its shapes
    Dynamic,

    /// Moved by its velocity only, unaffected by forces
    Kinematic,

    /// Never moves
    Static,
}

impl BodyKind {
    pub fn to_rigid_body_type(self) -> RigidBodyType {
        match self {
            BodyKind::Dynamic => RigidBodyType::Dynamic,
            BodyKind::Kinematic => RigidBodyType::KinematicVelocityBased,
            BodyKind::Static => RigidBodyType::Fixed,
        }
    }

    /// Whether the simulation writes this body's pose back to its visual
    pub fn is_synced(self) -> bool {
        !matches!(self, BodyKind::Static)
    }
}

/// Per-body settings applied at registration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyOptions {
    /// Initial linear velocity
    pub velocity: Vec2,

    /// Initial angular velocity (radians per second)
    pub angular_velocity: f32,

    /// Total mass, overriding the shapes' density
    pub mass: Option<f32>,

    /// Gravity scale (1.0 = normal gravity, 0.0 = no gravity)
    pub gravity_scale: f32,

    pub linear_damping: f32,
    pub angular_damping: f32,

    /// Constant difference between the visual's rotation and the body's angle
    pub angle_offset: f32,

    /// Whether the body can sleep when inactive
    pub can_sleep: bool,

    /// Moment of inertia, overriding the one derived from the shapes
    pub moment: Option<f32>,

    /// Center of gravity in the visual's local frame, overriding the shapes' centroid
    pub center_of_gravity: Option<Vec2>,

    /// World-space force applied during the first frame only
    pub force: Vec2,

    /// Torque applied during the first frame only
    pub torque: f32,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self {
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            mass: None,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            angle_offset: 0.0,
            can_sleep: true,
            moment: None,
            center_of_gravity: None,
            force: Vec2::ZERO,
            torque: 0.0,
        }
    }
}

/// Per-shape material and event settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeOptions {
    /// Restitution/bounciness (0.0 = no bounce, 1.0 = perfect bounce)
    pub elasticity: f32,

    /// Friction coefficient (0.0 = no friction)
    pub friction: f32,

    /// Density (mass will be calculated from shape area)
    pub density: f32,

    /// Mass of the whole shape set, overriding density
    pub mass: Option<f32>,

    /// Key used to select collision handlers
    pub collision_type: u32,

    /// Sensors report collisions without a physical response
    pub sensor: bool,

    /// World-space velocity of the surface, seen by friction only (conveyor belts)
    pub surface_velocity: Vec2,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            elasticity: 0.0,
            friction: 0.0,
            density: 1.0,
            mass: None,
            collision_type: 0,
            sensor: false,
            surface_velocity: Vec2::ZERO,
        }
    }
}

impl ShapeOptions {
    /// Bouncy, grippy material
    pub fn material() -> Self {
        Self {
            elasticity: 0.8,
            friction: 0.8,
            ..Self::default()
        }
    }

    pub fn with_elasticity(mut self, elasticity: f32) -> Self {
        self.elasticity = elasticity;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self.mass = None;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = Some(mass);
        self
    }

    pub fn with_collision_type(mut self, collision_type: u32) -> Self {
        self.collision_type = collision_type;
        self
    }

    pub fn sensor(mut self, is_sensor: bool) -> Self {
        self.sensor = is_sensor;
        self
    }

    pub fn with_surface_velocity(mut self, velocity: Vec2) -> Self {
        self.surface_velocity = velocity;
        self
    }

    /// Solver hooks the shapes need
    pub fn active_hooks(&self) -> ActiveHooks {
        let hooks = ActiveHooks::FILTER_CONTACT_PAIRS | ActiveHooks::FILTER_INTERSECTION_PAIR;
        if self.surface_velocity == Vec2::ZERO {
            hooks
        } else {
            hooks | ActiveHooks::MODIFY_SOLVER_CONTACTS
        }
    }
}

/// Builder for creating rigid bodies with common configurations
pub struct BodyBuilder {
    body_type: RigidBodyType,
    position: Isometry<Real>,
    linvel: Vector<Real>,
    angvel: Real,
    gravity_scale: Real,
    linear_damping: Real,
    angular_damping: Real,
    can_sleep: bool,
    sleep_time: Option<Real>,
}

impl BodyBuilder {
    pub fn new(kind: BodyKind) -> Self {
        Self {
            body_type: kind.to_rigid_body_type(),
            position: Isometry::identity(),
            linvel: Vector::zeros(),
            angvel: 0.0,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            can_sleep: true,
            sleep_time: None,
        }
    }

    /// Start from registration options
    pub fn from_options(kind: BodyKind, options: &BodyOptions) -> Self {
        Self::new(kind)
            .linvel(options.velocity)
            .angvel(options.angular_velocity)
            .gravity_scale(options.gravity_scale)
            .damping(options.linear_damping, options.angular_damping)
            .can_sleep(options.can_sleep)
    }

    /// Set the initial position and rotation
    pub fn position_rotation(mut self, position: Vec2, angle: Real) -> Self {
        self.position = Isometry::new(to_vector(position), angle);
        self
    }

    /// Set the initial linear velocity
    pub fn linvel(mut self, velocity: Vec2) -> Self {
        self.linvel = to_vector(velocity);
        self
    }

    /// Set the initial angular velocity (radians per second)
    pub fn angvel(mut self, angvel: Real) -> Self {
        self.angvel = angvel;
        self
    }

    pub fn gravity_scale(mut self, scale: Real) -> Self {
        self.gravity_scale = scale;
        self
    }

    pub fn damping(mut self, linear: Real, angular: Real) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    /// Set whether the body can sleep when inactive
    pub fn can_sleep(mut self, can_sleep: bool) -> Self {
        self.can_sleep = can_sleep;
        self
    }

    /// Seconds of rest before the body falls asleep
    pub fn sleep_time(mut self, seconds: Option<Real>) -> Self {
        self.sleep_time = seconds;
        self
    }

    /// Build the rigid body
    pub fn build(self) -> RigidBody {
        let can_sleep = self.can_sleep && self.sleep_time.is_some();
        let mut body = RigidBodyBuilder::new(self.body_type)
            .position(self.position)
            .linvel(self.linvel)
            .angvel(self.angvel)
            .gravity_scale(self.gravity_scale)
            .linear_damping(self.linear_damping)
            .angular_damping(self.angular_damping)
            .can_sleep(can_sleep)
            .build();

        if let (true, Some(seconds)) = (can_sleep, self.sleep_time) {
            body.activation_mut().time_until_sleep = seconds;
        }

        body
    }
}

/// Builder for creating colliders with common configurations
pub struct ColliderBuilder2D {
    shape: SharedShape,
    filter: CollisionFilter,
    is_sensor: bool,
    friction: Real,
    restitution: Real,
    density: Real,
    mass: Option<Real>,
    hooks: ActiveHooks,
}

impl ColliderBuilder2D {
    pub fn new(shape: SharedShape) -> Self {
        let defaults = ShapeOptions::default();
        Self {
            shape,
            filter: CollisionFilter::default(),
            is_sensor: defaults.sensor,
            friction: defaults.friction,
            restitution: defaults.elasticity,
            density: defaults.density,
            mass: None,
            hooks: defaults.active_hooks(),
        }
    }

    /// Apply material and sensor settings
    pub fn options(mut self, options: &ShapeOptions) -> Self {
        self.is_sensor = options.sensor;
        self.friction = options.friction;
        self.restitution = options.elasticity;
        self.density = options.density;
        self.hooks = options.active_hooks();
        self
    }

    /// Set the collision filter
    pub fn filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set mass directly (overrides density)
    pub fn mass(mut self, mass: Real) -> Self {
        self.mass = Some(mass);
        self
    }

    /// Build the collider
    pub fn build(self) -> Collider {
        let mut builder = ColliderBuilder::new(self.shape)
            .collision_groups(self.filter.to_interaction_groups())
            .user_data(self.filter.user_data())
            .sensor(self.is_sensor)
            .friction(self.friction)
            .friction_combine_rule(CoefficientCombineRule::Multiply)
            .restitution(self.restitution)
            .restitution_combine_rule(CoefficientCombineRule::Multiply)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .active_hooks(self.hooks);

        // Set mass or density
        if let Some(mass) = self.mass {
            builder = builder.mass(mass);
        } else {
            builder = builder.density(self.density);
        }

        builder.build()
    }
}

/// Physics shapes for one descriptor, in the body's local frame
pub fn shapes_for(descriptor: &ShapeDescriptor) -> Result<Vec<SharedShape>, ShapeError> {
    match descriptor {
        ShapeDescriptor::Circle { radius } => Ok(vec![SharedShape::ball(*radius)]),
        ShapeDescriptor::Solid { vertices, radius } => Ok(vec![polygon_shape(vertices, *radius)?]),
        ShapeDescriptor::Hollow {
            segments,
            thickness,
        } => Ok(segments
            .iter()
            .map(|[a, b]| {
                if *thickness > 0.0 {
                    SharedShape::capsule(to_point(*a), to_point(*b), thickness / 2.0)
                } else {
                    SharedShape::segment(to_point(*a), to_point(*b))
                }
            })
            .collect()),
        ShapeDescriptor::ImageMask { polygons, radius }
        | ShapeDescriptor::Decomposed { polygons, radius } => polygons
            .iter()
            .map(|polygon| polygon_shape(polygon, *radius))
            .collect(),
    }
}

fn polygon_shape(vertices: &[Vec2], radius: f32) -> Result<SharedShape, ShapeError> {
    if vertices.len() < 3 || polygon_area(vertices) < 1e-9 {
        return Err(ShapeError::DegenerateGeometry(format!(
            "polygon with {} vertices has no area",
            vertices.len()
        )));
    }
    let points: Vec<Point<Real>> = vertices.iter().map(|v| to_point(*v)).collect();
    let shape = if radius > 0.0 {
        SharedShape::round_convex_polyline(points.clone(), radius)
            .or_else(|| SharedShape::round_convex_hull(&points, radius))
    } else {
        SharedShape::convex_polyline(points.clone()).or_else(|| SharedShape::convex_hull(&points))
    };
    shape.ok_or_else(|| {
        ShapeError::DegenerateGeometry(format!(
            "{} vertices do not form a convex polygon",
            vertices.len()
        ))
    })
}

/// Build every collider of a binding.
///
/// A mass override is spread across the colliders in proportion to their area,
/// or evenly when the shapes have no area (bare segments).
pub fn build_colliders(
    descriptors: &[ShapeDescriptor],
    options: &ShapeOptions,
    filter: CollisionFilter,
    mass_override: Option<f32>,
) -> Result<Vec<Collider>, ShapeError> {
    let mut shapes = Vec::new();
    for descriptor in descriptors {
        shapes.extend(shapes_for(descriptor)?);
    }
    if shapes.is_empty() {
        return Err(ShapeError::DegenerateGeometry(
            "no collision shapes to attach".to_string(),
        ));
    }

    let total_mass = mass_override.or(options.mass);
    let areas: Vec<Real> = shapes.iter().map(|s| s.mass_properties(1.0).mass()).collect();
    let total_area: Real = areas.iter().sum();

    let count = shapes.len() as Real;
    Ok(shapes
        .into_iter()
        .zip(areas)
        .map(|(shape, area)| {
            let mut builder = ColliderBuilder2D::new(shape).options(options).filter(filter);
            if let Some(mass) = total_mass {
                let share = if total_area > 0.0 {
                    area / total_area
                } else {
                    1.0 / count
                };
                builder = builder.mass(mass * share);
            }
            builder.build()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_descriptor() -> ShapeDescriptor {
        ShapeDescriptor::Solid {
            vertices: vec![
                Vec2::new(-0.5, -0.5),
                Vec2::new(0.5, -0.5),
                Vec2::new(0.5, 0.5),
                Vec2::new(-0.5, 0.5),
            ],
            radius: 0.0,
        }
    }

    #[test]
    fn test_body_builder_dynamic() {
        let body = BodyBuilder::new(BodyKind::Dynamic)
            .position_rotation(Vec2::new(10.0, 20.0), 0.5)
            .linvel(Vec2::new(5.0, 0.0))
            .build();

        assert_eq!(body.body_type(), RigidBodyType::Dynamic);
        assert_eq!(body.translation().x, 10.0);
        assert_eq!(body.translation().y, 20.0);
        assert_relative_eq!(body.rotation().angle(), 0.5, epsilon = 1e-6);
        assert_eq!(body.linear_damping(), 0.0);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            BodyKind::Kinematic.to_rigid_body_type(),
            RigidBodyType::KinematicVelocityBased
        );
        assert_eq!(BodyKind::Static.to_rigid_body_type(), RigidBodyType::Fixed);
        assert!(!BodyKind::Static.is_synced());
    }

    #[test]
    fn test_collider_carries_options() {
        let options = ShapeOptions::material().sensor(true);
        let filter = CollisionFilter::new(3, 0b1, 0b10);
        let colliders = build_colliders(&[square_descriptor()], &options, filter, None).unwrap();

        assert_eq!(colliders.len(), 1);
        let collider = &colliders[0];
        assert!(collider.is_sensor());
        assert_relative_eq!(collider.friction(), 0.8);
        assert_relative_eq!(collider.restitution(), 0.8);
        assert_eq!(collider.user_data, 3);
        assert_eq!(collider.collision_groups().memberships.bits(), 0b1);
    }

    #[test]
    fn test_mass_split_by_area() {
        let descriptors = vec![
            square_descriptor(),
            ShapeDescriptor::Circle { radius: 1.0 },
        ];
        let colliders = build_colliders(
            &descriptors,
            &ShapeOptions::default(),
            CollisionFilter::default(),
            Some(10.0),
        )
        .unwrap();
        let total: f32 = colliders.iter().map(|c| c.mass()).sum();
        assert_relative_eq!(total, 10.0, epsilon = 1e-3);
        assert!(colliders[1].mass() > colliders[0].mass());
    }

    #[test]
    fn test_conveyor_shapes_modify_contacts() {
        let plain = build_colliders(
            &[square_descriptor()],
            &ShapeOptions::default(),
            CollisionFilter::default(),
            None,
        )
        .unwrap();
        assert!(!plain[0]
            .active_hooks()
            .contains(ActiveHooks::MODIFY_SOLVER_CONTACTS));

        let belt = ShapeOptions::default().with_surface_velocity(Vec2::new(2.0, 0.0));
        let colliders =
            build_colliders(&[square_descriptor()], &belt, CollisionFilter::default(), None)
                .unwrap();
        let hooks = colliders[0].active_hooks();
        assert!(hooks.contains(ActiveHooks::MODIFY_SOLVER_CONTACTS));
        assert!(hooks.contains(ActiveHooks::FILTER_CONTACT_PAIRS));
    }

    #[test]
    fn test_hollow_segments_become_capsules() {
        let descriptor = ShapeDescriptor::Hollow {
            segments: vec![[Vec2::ZERO, Vec2::X], [Vec2::X, Vec2::ONE]],
            thickness: 0.1,
        };
        let shapes = shapes_for(&descriptor).unwrap();
        assert_eq!(shapes.len(), 2);
        assert!(shapes[0].as_capsule().is_some());
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        let descriptor = ShapeDescriptor::Solid {
            vertices: vec![Vec2::ZERO, Vec2::X, Vec2::new(2.0, 0.0)],
            radius: 0.0,
        };
        assert!(shapes_for(&descriptor).is_err());
    }
}
