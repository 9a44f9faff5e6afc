//! Kinetic Scene: a 2D rigid-body simulation bound to a scene graph of visual objects.
//!
//! Visual objects are registered with a [`PhysicsSpace`], which synthesizes collision
//! shapes from their geometry, creates rapier bodies for them, and writes simulated
//! transforms back to the host every frame through [`VisualHost`].

pub mod core;
pub mod engine;

pub use crate::core::math::Transform2D;
pub use engine::physics::{
    BindingError, BodyKind, BodyOptions, CollisionHandler, ConstraintError, ConstraintKind,
    PhysicsSpace, PositionUpdate, ShapeOptions, SpaceConfig, VelocityUpdate,
};
pub use engine::scene::{Scene, VisualHost, VisualId, VisualObject};
pub use engine::shapes::{BuildMode, ShapeBuilder, ShapeDescriptor, ShapeError, VisualGeometry};
pub use engine::sync::{FrameReport, SyncPhase};
