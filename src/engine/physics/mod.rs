// Physics system using rapier2d

pub mod body;
pub mod collision;
pub mod config;
pub mod constraint;
pub mod integration;
pub mod query;
pub mod registry;
pub mod space;
mod world;

pub use body::{BodyKind, BodyOptions, ShapeOptions};
pub use collision::{
    CollisionCallback, CollisionContext, CollisionFilter, CollisionHandler, CollisionPhase,
    Commands, ContactFilter, ContactOverrides, TouchingPair,
};
pub use config::{ConfigError, SpaceConfig};
pub use constraint::{
    ConstraintBinding, ConstraintError, ConstraintGlyph, ConstraintId, ConstraintKind,
    DampedRotarySpringParams, DampedSpringParams, GearParams, GrooveParams, MotorParams,
    PinParams, Pivot, RatchetParams, RotaryLimitParams, SlideParams,
};
pub use integration::{PositionUpdate, VelocityUpdate};
pub use query::{ContactPoint, PointHit, SegmentHit};
pub use registry::{BindingError, VisualObjectBinding};
pub use space::{AdvancedAccess, PhysicsSpace};
pub use world::PhysicsWorld;

// Re-export commonly used rapier types for convenience
pub use rapier2d::prelude::{ColliderHandle, Real, RigidBodyHandle};
