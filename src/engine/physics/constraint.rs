// Declared constraints between bound bodies and their visual glyphs

use glam::Vec2;
use rapier2d::prelude::*;
use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::fmt;

use super::registry::{BindingError, BodyRegistry};
use super::world::PhysicsWorld;
use crate::core::math::{from_point, from_vector, to_point, to_vector, wrap_angle};
use crate::engine::scene::VisualId;

/// Velocity gain of motor joints, high enough that `max_torque` is the effective limit
const MOTOR_FACTOR: Real = 1.0e4;

/// Fraction of the position error gear and ratchet constraints correct per substep
const BIAS_FACTOR: Real = 0.2;

const SPRING_TURNS: usize = 18;
const SPRING_SAMPLES_PER_TURN: usize = 12;
const SPRING_AMPLITUDE: f32 = 0.1;
const SPRING_END_LENGTH: f32 = 0.2;

/// Radius of arc glyphs
pub const ARC_RADIUS: f32 = 0.3;

/// Length of rotation pointers drawn for gears, ratchets and motors
pub const INDICATOR_LENGTH: f32 = 0.5;

/// Unique identity of a constraint inside one space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub u64);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint#{}", self.0)
    }
}

/// Fixed distance between two anchors
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PinParams {
    pub anchor_a: Vec2,
    pub anchor_b: Vec2,
    /// `None` keeps the anchors' distance at creation time
    pub distance: Option<f32>,
}

/// Anchor distance clamped to `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SlideParams {
    pub anchor_a: Vec2,
    pub anchor_b: Vec2,
    pub min: f32,
    pub max: f32,
}

/// Where the two bodies are pinned together
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pivot {
    /// A world-space point, converted to both bodies' frames at creation
    World(Vec2),
    Anchors { anchor_a: Vec2, anchor_b: Vec2 },
}

/// Anchor of B slides along the segment `groove_a..groove_b` fixed on A
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GrooveParams {
    pub groove_a: Vec2,
    pub groove_b: Vec2,
    pub anchor_b: Vec2,
}

/// Relative angle `angle_b - angle_a` clamped to `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotaryLimitParams {
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DampedSpringParams {
    pub anchor_a: Vec2,
    pub anchor_b: Vec2,
    pub rest_length: f32,
    pub stiffness: f32,
    pub damping: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DampedRotarySpringParams {
    pub rest_angle: f32,
    pub stiffness: f32,
    pub damping: f32,
}

/// Keeps `ratio * angle_b - angle_a == phase`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearParams {
    pub phase: f32,
    pub ratio: f32,
}

impl Default for GearParams {
    fn default() -> Self {
        Self {
            phase: 0.0,
            ratio: 1.0,
        }
    }
}

/// Lets the relative angle advance in steps of `ratchet` and never go back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatchetParams {
    pub phase: f32,
    pub ratchet: f32,
}

/// Drives the relative angular velocity `w_b - w_a` towards `rate`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorParams {
    pub rate: f32,
    pub max_torque: f32,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            rate: 0.0,
            max_torque: f32::INFINITY,
        }
    }
}

/// Every constraint the adapter can build, with its parameters.
///
/// Anchors are points in each visual object's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintKind {
    Pin(PinParams),
    Slide(SlideParams),
    Pivot(Pivot),
    Groove(GrooveParams),
    RotaryLimit(RotaryLimitParams),
    DampedSpring(DampedSpringParams),
    DampedRotarySpring(DampedRotarySpringParams),
    Gear(GearParams),
    Ratchet(RatchetParams),
    Motor(MotorParams),
}

/// Errors raised while creating or editing constraints
#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    #[error("Invalid {kind} parameters: {reason}")]
    InvalidParams { kind: &'static str, reason: String },

    #[error("Constraint needs two different bodies, got {0} twice")]
    SameBody(VisualId),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("{0} does not exist")]
    NotFound(ConstraintId),
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> ConstraintError {
    ConstraintError::InvalidParams {
        kind,
        reason: reason.into(),
    }
}

impl ConstraintKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::Pin(_) => "pin",
            ConstraintKind::Slide(_) => "slide",
            ConstraintKind::Pivot(_) => "pivot",
            ConstraintKind::Groove(_) => "groove",
            ConstraintKind::RotaryLimit(_) => "rotary limit",
            ConstraintKind::DampedSpring(_) => "damped spring",
            ConstraintKind::DampedRotarySpring(_) => "damped rotary spring",
            ConstraintKind::Gear(_) => "gear",
            ConstraintKind::Ratchet(_) => "ratchet",
            ConstraintKind::Motor(_) => "motor",
        }
    }

    /// Check kind-specific parameter ranges
    pub fn validate(&self) -> Result<(), ConstraintError> {
        let kind = self.name();
        let finite = |values: &[f32]| {
            if values.iter().all(|v| v.is_finite()) {
                Ok(())
            } else {
                Err(invalid(kind, "parameters must be finite"))
            }
        };

        match self {
            ConstraintKind::Pin(p) => {
                finite(&[p.anchor_a.x, p.anchor_a.y, p.anchor_b.x, p.anchor_b.y])?;
                if let Some(distance) = p.distance {
                    finite(&[distance])?;
                    if distance < 0.0 {
                        return Err(invalid(kind, format!("distance {} is negative", distance)));
                    }
                }
            }
            ConstraintKind::Slide(p) => {
                finite(&[p.anchor_a.x, p.anchor_a.y, p.anchor_b.x, p.anchor_b.y, p.min, p.max])?;
                if p.min < 0.0 || p.min > p.max {
                    return Err(invalid(
                        kind,
                        format!("need 0 <= min <= max, got min {} max {}", p.min, p.max),
                    ));
                }
            }
            ConstraintKind::Pivot(Pivot::World(p)) => finite(&[p.x, p.y])?,
            ConstraintKind::Pivot(Pivot::Anchors { anchor_a, anchor_b }) => {
                finite(&[anchor_a.x, anchor_a.y, anchor_b.x, anchor_b.y])?
            }
            ConstraintKind::Groove(p) => {
                finite(&[
                    p.groove_a.x,
                    p.groove_a.y,
                    p.groove_b.x,
                    p.groove_b.y,
                    p.anchor_b.x,
                    p.anchor_b.y,
                ])?;
                if p.groove_a.distance(p.groove_b) < 1e-6 {
                    return Err(invalid(kind, "groove endpoints coincide"));
                }
            }
            ConstraintKind::RotaryLimit(p) => {
                finite(&[p.min, p.max])?;
                if p.min > p.max {
                    return Err(invalid(
                        kind,
                        format!("min {} is greater than max {}", p.min, p.max),
                    ));
                }
            }
            ConstraintKind::DampedSpring(p) => {
                finite(&[
                    p.anchor_a.x,
                    p.anchor_a.y,
                    p.anchor_b.x,
                    p.anchor_b.y,
                    p.rest_length,
                    p.stiffness,
                    p.damping,
                ])?;
                spring_ranges(kind, p.stiffness, p.damping)?;
                if p.rest_length < 0.0 {
                    return Err(invalid(kind, "rest length must not be negative"));
                }
            }
            ConstraintKind::DampedRotarySpring(p) => {
                finite(&[p.rest_angle, p.stiffness, p.damping])?;
                spring_ranges(kind, p.stiffness, p.damping)?;
            }
            ConstraintKind::Gear(p) => {
                finite(&[p.phase, p.ratio])?;
                if p.ratio == 0.0 {
                    return Err(invalid(kind, "ratio must not be zero"));
                }
            }
            ConstraintKind::Ratchet(p) => {
                finite(&[p.phase, p.ratchet])?;
                if p.ratchet == 0.0 {
                    return Err(invalid(kind, "ratchet step must not be zero"));
                }
            }
            ConstraintKind::Motor(p) => {
                finite(&[p.rate])?;
                // Infinite torque is allowed
                if p.max_torque.is_nan() || p.max_torque < 0.0 {
                    return Err(invalid(kind, "max torque must be non-negative"));
                }
            }
        }
        Ok(())
    }
}

fn spring_ranges(kind: &'static str, stiffness: f32, damping: f32) -> Result<(), ConstraintError> {
    if stiffness < 0.0 {
        return Err(invalid(kind, "stiffness must not be negative"));
    }
    if damping < 0.0 {
        return Err(invalid(kind, "damping must not be negative"));
    }
    Ok(())
}

/// Visual representation of a constraint, recomputed after every step
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintGlyph {
    Line {
        start: Vec2,
        end: Vec2,
    },
    /// Zig-zag polyline from the first anchor to the second
    Spring {
        points: Vec<Vec2>,
    },
    Groove {
        start: Vec2,
        end: Vec2,
        pivot: Vec2,
    },
    Arc {
        center: Vec2,
        radius: f32,
        start_angle: f32,
        sweep: f32,
    },
    /// One pointer per body, from its center along its rotation
    Indicators {
        pointers: Vec<[Vec2; 2]>,
    },
}

/// Angle that keeps counting past a full turn
#[derive(Debug, Clone, Copy)]
struct AngleTracker {
    raw: Real,
    unwrapped: Real,
}

impl AngleTracker {
    fn new(angle: Real) -> Self {
        Self {
            raw: angle,
            unwrapped: angle,
        }
    }

    fn update(&mut self, raw: Real) -> Real {
        self.unwrapped += wrap_angle(raw - self.raw);
        self.raw = raw;
        self.unwrapped
    }
}

/// Angular state of one body as seen by the velocity constraints
struct Spin {
    angle: Real,
    angvel: Real,
    inv_inertia: Real,
}

impl Spin {
    fn of(body: &RigidBody) -> Self {
        let inv_inertia = if body.is_dynamic() {
            let sqrt = body.mass_properties().effective_world_inv_inertia_sqrt;
            sqrt * sqrt
        } else {
            0.0
        };
        Self {
            angle: body.rotation().angle(),
            angvel: body.angvel(),
            inv_inertia,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GearState {
    params: GearParams,
    a: AngleTracker,
    b: AngleTracker,
}

impl GearState {
    /// New angular velocities for both bodies
    fn solve(&mut self, a: &Spin, b: &Spin, dt: Real) -> Option<(Real, Real)> {
        let theta_a = self.a.update(a.angle);
        let theta_b = self.b.update(b.angle);
        let ratio = self.params.ratio;

        let k = a.inv_inertia + ratio * ratio * b.inv_inertia;
        if k <= 0.0 {
            return None;
        }
        let error = ratio * theta_b - theta_a - self.params.phase;
        let lambda = -(ratio * b.angvel - a.angvel + BIAS_FACTOR * error / dt) / k;
        Some((
            a.angvel - a.inv_inertia * lambda,
            b.angvel + b.inv_inertia * ratio * lambda,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
struct RatchetState {
    params: RatchetParams,
    /// Relative angle the ratchet currently holds
    angle: Real,
    a: AngleTracker,
    b: AngleTracker,
}

impl RatchetState {
    fn solve(&mut self, a: &Spin, b: &Spin, dt: Real) -> Option<(Real, Real)> {
        let delta = self.b.update(b.angle) - self.a.update(a.angle);
        let RatchetParams { phase, ratchet } = self.params;

        let diff = self.angle - delta;
        let mut penetration = 0.0;
        if diff * ratchet > 0.0 {
            penetration = diff;
        } else {
            self.angle = ((delta - phase) / ratchet).floor() * ratchet + phase;
        }
        if penetration == 0.0 {
            return None;
        }

        let k = a.inv_inertia + b.inv_inertia;
        if k <= 0.0 {
            return None;
        }
        let relative = b.angvel - a.angvel;
        let impulse = (BIAS_FACTOR * penetration / dt - relative) / k;
        // A ratchet only ever pushes forward
        if impulse * ratchet <= 0.0 {
            return None;
        }
        Some((
            a.angvel - impulse * a.inv_inertia,
            b.angvel + impulse * b.inv_inertia,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum Solver {
    Joint(ImpulseJointHandle),
    Gear(GearState),
    Ratchet(RatchetState),
}

/// One live constraint
#[derive(Debug, Clone)]
pub struct ConstraintBinding {
    id: ConstraintId,
    kind: ConstraintKind,
    a: VisualId,
    b: VisualId,
    body_a: RigidBodyHandle,
    body_b: RigidBodyHandle,
    /// Anchors in the bodies' own frames
    anchors: [Vec2; 2],
    /// Far end of a groove, in A's body frame
    groove_end: Option<Vec2>,
    solver: Solver,
    glyph: ConstraintGlyph,
}

impl ConstraintBinding {
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub fn bodies(&self) -> (VisualId, VisualId) {
        (self.a, self.b)
    }

    pub fn involves(&self, id: VisualId) -> bool {
        self.a == id || self.b == id
    }

    /// Glyph as of the last refresh
    pub fn glyph(&self) -> &ConstraintGlyph {
        &self.glyph
    }

    /// Rapier joint behind this constraint, `None` for solver-side kinds
    pub fn joint(&self) -> Option<ImpulseJointHandle> {
        match self.solver {
            Solver::Joint(handle) => Some(handle),
            _ => None,
        }
    }

    fn glyph_for(&self, pos_a: &Isometry<Real>, pos_b: &Isometry<Real>) -> ConstraintGlyph {
        let to_world = |pos: &Isometry<Real>, p: Vec2| from_point(&(pos * to_point(p)));
        let world_a = to_world(pos_a, self.anchors[0]);
        let world_b = to_world(pos_b, self.anchors[1]);
        let center_a = from_vector(&pos_a.translation.vector);
        let center_b = from_vector(&pos_b.translation.vector);
        let angle_a = pos_a.rotation.angle();
        let angle_b = pos_b.rotation.angle();
        let pointer = |center: Vec2, angle: f32| {
            [center, center + Vec2::from_angle(angle) * INDICATOR_LENGTH]
        };

        match &self.kind {
            ConstraintKind::Pin(_) | ConstraintKind::Slide(_) | ConstraintKind::Pivot(_) => {
                ConstraintGlyph::Line {
                    start: world_a,
                    end: world_b,
                }
            }
            ConstraintKind::DampedSpring(_) => ConstraintGlyph::Spring {
                points: spring_points(world_a, world_b),
            },
            ConstraintKind::Groove(_) => ConstraintGlyph::Groove {
                start: world_a,
                end: to_world(pos_a, self.groove_end.unwrap_or(self.anchors[0])),
                pivot: world_b,
            },
            ConstraintKind::RotaryLimit(p) => ConstraintGlyph::Arc {
                center: center_a,
                radius: ARC_RADIUS,
                start_angle: angle_a + p.min,
                sweep: p.max - p.min,
            },
            // Deviation of B from its rest angle relative to A
            ConstraintKind::DampedRotarySpring(p) => ConstraintGlyph::Arc {
                center: center_b,
                radius: ARC_RADIUS,
                start_angle: angle_a + p.rest_angle,
                sweep: wrap_angle(angle_b - angle_a - p.rest_angle),
            },
            ConstraintKind::Gear(_) | ConstraintKind::Ratchet(_) | ConstraintKind::Motor(_) => {
                ConstraintGlyph::Indicators {
                    pointers: vec![pointer(center_a, angle_a), pointer(center_b, angle_b)],
                }
            }
        }
    }
}

/// Tapered zig-zag between two points with straight leads at both ends
pub fn spring_points(start: Vec2, end: Vec2) -> Vec<Vec2> {
    let span = end - start;
    let length = span.length();
    if length < 1e-3 {
        return vec![start, end];
    }

    let helix = (length - 2.0 * SPRING_END_LENGTH).max(0.01);
    let steps = SPRING_TURNS * SPRING_SAMPLES_PER_TURN;
    let mut points = Vec::with_capacity(steps + 4);
    points.push(Vec2::ZERO);
    points.push(Vec2::new(SPRING_END_LENGTH, 0.0));
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let taper = if t < 0.1 {
            t / 0.1
        } else if t > 0.9 {
            (1.0 - t) / 0.1
        } else {
            1.0
        };
        let angle = TAU * SPRING_TURNS as f32 * t;
        points.push(Vec2::new(
            SPRING_END_LENGTH + t * helix,
            SPRING_AMPLITUDE * angle.sin() * taper,
        ));
    }
    points.push(Vec2::new(length, 0.0));

    let direction = span / length;
    points
        .into_iter()
        .map(|p| start + direction.rotate(p))
        .collect()
}

/// Body handle, pose and angle offset of one endpoint at creation time
struct Endpoint {
    handle: RigidBodyHandle,
    position: Isometry<Real>,
    angle_offset: f32,
}

impl Endpoint {
    fn resolve(
        world: &PhysicsWorld,
        registry: &BodyRegistry,
        id: VisualId,
    ) -> Result<Self, BindingError> {
        let (binding, body) = registry.body(world, id)?;
        Ok(Self {
            handle: binding.body(),
            position: *body.position(),
            angle_offset: binding.angle_offset(),
        })
    }

    /// Visual-local point to body frame
    fn local(&self, p: Vec2) -> Vec2 {
        Vec2::from_angle(self.angle_offset).rotate(p)
    }

    fn to_world(&self, body_local: Vec2) -> Vec2 {
        from_point(&(self.position * to_point(body_local)))
    }

    fn from_world(&self, world: Vec2) -> Vec2 {
        from_point(&self.position.inverse_transform_point(&to_point(world)))
    }
}

fn distance_joint(anchors: [Vec2; 2], min: Real, max: Real) -> GenericJoint {
    GenericJointBuilder::new(JointAxesMask::empty())
        .coupled_axes(JointAxesMask::LIN_AXES)
        .local_anchor1(to_point(anchors[0]))
        .local_anchor2(to_point(anchors[1]))
        .limits(JointAxis::X, [min, max])
        .build()
}

fn pivot_joint(anchors: [Vec2; 2]) -> GenericJoint {
    RevoluteJointBuilder::new()
        .local_anchor1(to_point(anchors[0]))
        .local_anchor2(to_point(anchors[1]))
        .build()
        .into()
}

/// Builds constraints between bound bodies and keeps their glyphs current
#[derive(Debug, Default)]
pub struct ConstraintAdapter {
    constraints: BTreeMap<ConstraintId, ConstraintBinding>,
    next_id: u64,
}

impl ConstraintAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `kind` and add it between the bodies of `a` and `b`
    pub fn create(
        &mut self,
        world: &mut PhysicsWorld,
        registry: &BodyRegistry,
        a: VisualId,
        b: VisualId,
        kind: ConstraintKind,
    ) -> Result<ConstraintId, ConstraintError> {
        if a == b {
            return Err(ConstraintError::SameBody(a));
        }
        kind.validate()?;
        let end_a = Endpoint::resolve(world, registry, a)?;
        let end_b = Endpoint::resolve(world, registry, b)?;

        let mut anchors = [Vec2::ZERO; 2];
        let mut groove_end = None;

        let joint = match &kind {
            ConstraintKind::Pin(p) => {
                anchors = [end_a.local(p.anchor_a), end_b.local(p.anchor_b)];
                let distance = p.distance.unwrap_or_else(|| {
                    end_a.to_world(anchors[0]).distance(end_b.to_world(anchors[1]))
                });
                // A zero-length pin has no direction to hold
                if distance < 1e-6 {
                    Some(pivot_joint(anchors))
                } else {
                    Some(distance_joint(anchors, distance, distance))
                }
            }
            ConstraintKind::Slide(p) => {
                anchors = [end_a.local(p.anchor_a), end_b.local(p.anchor_b)];
                Some(distance_joint(anchors, p.min, p.max))
            }
            ConstraintKind::Pivot(pivot) => {
                anchors = match pivot {
                    Pivot::World(p) => [end_a.from_world(*p), end_b.from_world(*p)],
                    Pivot::Anchors { anchor_a, anchor_b } => {
                        [end_a.local(*anchor_a), end_b.local(*anchor_b)]
                    }
                };
                Some(pivot_joint(anchors))
            }
            ConstraintKind::Groove(p) => {
                let start = end_a.local(p.groove_a);
                let end = end_a.local(p.groove_b);
                anchors = [start, end_b.local(p.anchor_b)];
                groove_end = Some(end);

                let direction = to_vector(end - start);
                let axis_a = UnitVector::new_normalize(direction);
                let axis_b = UnitVector::new_normalize(
                    end_b.position.rotation.inverse() * (end_a.position.rotation * direction),
                );
                Some(
                    GenericJointBuilder::new(JointAxesMask::Y)
                        .local_anchor1(to_point(anchors[0]))
                        .local_anchor2(to_point(anchors[1]))
                        .local_axis1(axis_a)
                        .local_axis2(axis_b)
                        .limits(JointAxis::X, [0.0, start.distance(end)])
                        .build(),
                )
            }
            ConstraintKind::RotaryLimit(p) => Some(
                GenericJointBuilder::new(JointAxesMask::empty())
                    .limits(JointAxis::AngX, [p.min, p.max])
                    .build(),
            ),
            ConstraintKind::DampedSpring(p) => {
                anchors = [end_a.local(p.anchor_a), end_b.local(p.anchor_b)];
                Some(
                    GenericJointBuilder::new(JointAxesMask::empty())
                        .coupled_axes(JointAxesMask::LIN_AXES)
                        .local_anchor1(to_point(anchors[0]))
                        .local_anchor2(to_point(anchors[1]))
                        .motor_position(JointAxis::X, p.rest_length, p.stiffness, p.damping)
                        .motor_model(JointAxis::X, MotorModel::ForceBased)
                        .build(),
                )
            }
            ConstraintKind::DampedRotarySpring(p) => Some(
                GenericJointBuilder::new(JointAxesMask::empty())
                    .motor_position(JointAxis::AngX, p.rest_angle, p.stiffness, p.damping)
                    .motor_model(JointAxis::AngX, MotorModel::ForceBased)
                    .build(),
            ),
            ConstraintKind::Motor(p) => Some(
                GenericJointBuilder::new(JointAxesMask::empty())
                    .motor_velocity(JointAxis::AngX, p.rate, MOTOR_FACTOR)
                    .motor_max_force(JointAxis::AngX, p.max_torque.min(Real::MAX))
                    .build(),
            ),
            ConstraintKind::Gear(_) | ConstraintKind::Ratchet(_) => None,
        };

        let angle_a = end_a.position.rotation.angle();
        let angle_b = end_b.position.rotation.angle();
        let solver = match (joint, &kind) {
            (Some(joint), _) => {
                Solver::Joint(world.add_impulse_joint(end_a.handle, end_b.handle, joint))
            }
            (None, ConstraintKind::Gear(params)) => Solver::Gear(GearState {
                params: *params,
                a: AngleTracker::new(angle_a),
                b: AngleTracker::new(angle_b),
            }),
            (None, ConstraintKind::Ratchet(params)) => Solver::Ratchet(RatchetState {
                params: *params,
                angle: angle_b - angle_a,
                a: AngleTracker::new(angle_a),
                b: AngleTracker::new(angle_b),
            }),
            (None, other) => {
                return Err(invalid(other.name(), "no solver for this constraint"));
            }
        };

        let id = ConstraintId(self.next_id);
        self.next_id += 1;

        let mut binding = ConstraintBinding {
            id,
            kind,
            a,
            b,
            body_a: end_a.handle,
            body_b: end_b.handle,
            anchors,
            groove_end,
            solver,
            glyph: ConstraintGlyph::Line {
                start: Vec2::ZERO,
                end: Vec2::ZERO,
            },
        };
        binding.glyph = binding.glyph_for(&end_a.position, &end_b.position);

        log::info!("Added {} {} between {} and {}", kind.name(), id, a, b);
        self.constraints.insert(id, binding);
        Ok(id)
    }

    /// Remove a constraint and its joint
    pub fn remove(
        &mut self,
        world: &mut PhysicsWorld,
        id: ConstraintId,
    ) -> Result<ConstraintBinding, ConstraintError> {
        let binding = self
            .constraints
            .remove(&id)
            .ok_or(ConstraintError::NotFound(id))?;
        if let Solver::Joint(handle) = binding.solver {
            world.remove_impulse_joint(handle);
        }
        log::debug!("Removed {}", id);
        Ok(binding)
    }

    /// Remove every constraint touching `visual`
    pub fn remove_for_body(
        &mut self,
        world: &mut PhysicsWorld,
        visual: VisualId,
    ) -> Vec<ConstraintId> {
        let all = std::mem::take(&mut self.constraints);
        let (removed, kept): (BTreeMap<_, _>, BTreeMap<_, _>) =
            all.into_iter().partition(|(_, c)| c.involves(visual));
        self.constraints = kept;

        for binding in removed.values() {
            if let Solver::Joint(handle) = binding.solver {
                if !world.remove_impulse_joint(handle) {
                    log::warn!("Joint of {} was already gone from the space", binding.id);
                }
            }
            log::debug!("Removed {} with {}", binding.id, visual);
        }
        removed.into_keys().collect()
    }

    /// Apply gear and ratchet corrections before a substep of `dt` seconds
    pub fn pre_solve(&mut self, world: &mut PhysicsWorld, dt: Real) {
        if dt <= 0.0 {
            return;
        }
        for binding in self.constraints.values_mut() {
            if matches!(binding.solver, Solver::Joint(_)) {
                continue;
            }
            let (Some(body_a), Some(body_b)) = (
                world.get_rigid_body(binding.body_a),
                world.get_rigid_body(binding.body_b),
            ) else {
                continue;
            };
            let (a, b) = (Spin::of(body_a), Spin::of(body_b));

            let velocities = match &mut binding.solver {
                Solver::Gear(gear) => gear.solve(&a, &b, dt),
                Solver::Ratchet(ratchet) => ratchet.solve(&a, &b, dt),
                Solver::Joint(_) => None,
            };
            let Some((w_a, w_b)) = velocities else {
                continue;
            };
            for (handle, spin, angvel) in [(binding.body_a, &a, w_a), (binding.body_b, &b, w_b)] {
                if spin.inv_inertia > 0.0 {
                    if let Some(body) = world.get_rigid_body_mut(handle) {
                        body.set_angvel(angvel, true);
                    }
                }
            }
        }
    }

    /// Recompute every glyph from the bodies' current poses
    pub fn refresh_glyphs(&mut self, world: &PhysicsWorld) {
        for binding in self.constraints.values_mut() {
            let (Some(body_a), Some(body_b)) = (
                world.get_rigid_body(binding.body_a),
                world.get_rigid_body(binding.body_b),
            ) else {
                continue;
            };
            binding.glyph = binding.glyph_for(body_a.position(), body_b.position());
        }
    }

    /// Change the bounds of a rotary limit
    pub fn set_rotary_limits(
        &mut self,
        world: &mut PhysicsWorld,
        id: ConstraintId,
        min: f32,
        max: f32,
    ) -> Result<(), ConstraintError> {
        let params = RotaryLimitParams { min, max };
        ConstraintKind::RotaryLimit(params).validate()?;

        let binding = self
            .constraints
            .get_mut(&id)
            .ok_or(ConstraintError::NotFound(id))?;
        let name = binding.kind.name();
        let (ConstraintKind::RotaryLimit(current), Solver::Joint(handle)) =
            (&mut binding.kind, binding.solver)
        else {
            return Err(invalid(name, format!("{} is not a rotary limit", id)));
        };
        *current = params;
        if let Some(joint) = world.get_impulse_joint_mut(handle) {
            joint.data.set_limits(JointAxis::AngX, [min, max]);
        }
        Ok(())
    }

    /// Change the target rate of a motor
    pub fn set_motor_rate(
        &mut self,
        world: &mut PhysicsWorld,
        id: ConstraintId,
        rate: f32,
    ) -> Result<(), ConstraintError> {
        let binding = self
            .constraints
            .get_mut(&id)
            .ok_or(ConstraintError::NotFound(id))?;
        let name = binding.kind.name();
        let (ConstraintKind::Motor(current), Solver::Joint(handle)) =
            (&mut binding.kind, binding.solver)
        else {
            return Err(invalid(name, format!("{} is not a motor", id)));
        };
        if !rate.is_finite() {
            return Err(invalid("motor", "rate must be finite"));
        }
        current.rate = rate;
        if let Some(joint) = world.get_impulse_joint_mut(handle) {
            joint.data.set_motor_velocity(JointAxis::AngX, rate, MOTOR_FACTOR);
        }
        Ok(())
    }

    /// Relative angle a ratchet currently holds, `None` for other kinds
    pub fn ratchet_angle(&self, id: ConstraintId) -> Option<f32> {
        match self.constraints.get(&id)?.solver {
            Solver::Ratchet(state) => Some(state.angle),
            _ => None,
        }
    }

    pub fn get(&self, id: ConstraintId) -> Option<&ConstraintBinding> {
        self.constraints.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstraintBinding> {
        self.constraints.values()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}
