// Physics space facade: the one object a host scene holds

use glam::Vec2;
use rapier2d::prelude::{Collider, ImpulseJoint, IntegrationParameters, RigidBody};

use super::body::{BodyKind, BodyOptions, ShapeOptions};
use super::collision::{CollisionDispatcher, CollisionFilter, CollisionHandler, Commands};
use super::config::{ConfigError, SpaceConfig};
use super::constraint::{
    ConstraintAdapter, ConstraintBinding, ConstraintError, ConstraintId, ConstraintKind,
};
use super::integration::{IntegrationFuncs, PositionUpdate, VelocityUpdate};
use super::query::{self, ContactPoint, PointHit, SegmentHit};
use super::registry::{BindingError, BodyRegistry, VisualObjectBinding};
use super::world::PhysicsWorld;
use crate::core::math::{from_vector, to_point, to_vector};
use crate::engine::scene::{VisualHost, VisualId, VisualObject};
use crate::engine::shapes::{BuildMode, ShapeBuilder};
use crate::engine::sync::{FrameReport, SyncPhase, SyncScheduler};

/// Everything one frame of the scheduler touches
pub(crate) struct SimulationState {
    pub(crate) world: PhysicsWorld,
    pub(crate) registry: BodyRegistry,
    pub(crate) constraints: ConstraintAdapter,
    pub(crate) dispatcher: CollisionDispatcher,
    /// Velocity and position callbacks run around every substep
    pub(crate) integrators: IntegrationFuncs,
    /// Removals requested by collision handlers, applied at the frame boundary
    pub(crate) commands: Commands,
}

/// A physics space bound to visual objects.
///
/// Owns the rapier world, the binding table, constraints, collision handlers and
/// the frame scheduler. Hosts register visual objects, then call
/// [`PhysicsSpace::step_and_sync`] once per rendered frame.
pub struct PhysicsSpace {
    config: SpaceConfig,
    builder: ShapeBuilder,
    state: SimulationState,
    scheduler: SyncScheduler,
}

impl PhysicsSpace {
    /// Create a space, rejecting invalid configuration
    pub fn new(config: SpaceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(config))
    }

    fn assemble(config: SpaceConfig) -> Self {
        log::info!(
            "Physics space created: gravity ({}, {}), {} substeps per frame",
            config.gravity.x,
            config.gravity.y,
            config.substeps
        );
        Self {
            config,
            builder: ShapeBuilder::new(),
            state: SimulationState {
                world: PhysicsWorld::new(&config),
                registry: BodyRegistry::new(config.sleep_time_threshold),
                constraints: ConstraintAdapter::new(),
                dispatcher: CollisionDispatcher::new(),
                integrators: IntegrationFuncs::new(),
                commands: Commands::new(),
            },
            scheduler: SyncScheduler::new(config.substeps),
        }
    }

    /// Replace the shape builder used by subsequent registrations
    pub fn with_shape_builder(mut self, builder: ShapeBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn gravity(&self) -> Vec2 {
        self.state.world.gravity()
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.config.gravity = gravity;
        self.state.world.set_gravity(gravity);
    }

    // --- Bodies ---

    /// Register a visual object with solid shapes and default options
    pub fn register_body(
        &mut self,
        object: &VisualObject,
        kind: BodyKind,
    ) -> Result<&VisualObjectBinding, BindingError> {
        self.register_body_with(
            object,
            kind,
            BuildMode::Solid,
            &BodyOptions::default(),
            &ShapeOptions::default(),
        )
    }

    /// Register a visual object with explicit build mode and options
    pub fn register_body_with(
        &mut self,
        object: &VisualObject,
        kind: BodyKind,
        mode: BuildMode,
        body_options: &BodyOptions,
        shape_options: &ShapeOptions,
    ) -> Result<&VisualObjectBinding, BindingError> {
        if self.state.registry.contains(object.id) {
            return Err(BindingError::AlreadyBound(object.id));
        }
        let descriptors = self.builder.build(&object.geometry, mode)?;
        self.state.registry.attach(
            &mut self.state.world,
            object,
            kind,
            &descriptors,
            body_options,
            shape_options,
        )
    }

    /// Remove a body, its shapes and every constraint touching it
    pub fn remove_body(&mut self, id: VisualId) -> Result<(), BindingError> {
        self.state.registry.get(id)?;
        self.state
            .constraints
            .remove_for_body(&mut self.state.world, id);
        self.state.registry.detach(&mut self.state.world, id)?;
        self.state.integrators.clear_velocity(id);
        self.state.integrators.clear_position(id);
        Ok(())
    }

    pub fn binding(&self, id: VisualId) -> Result<&VisualObjectBinding, BindingError> {
        self.state.registry.get(id)
    }

    pub fn is_bound(&self, id: VisualId) -> bool {
        self.state.registry.contains(id)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &VisualObjectBinding> {
        self.state.registry.iter()
    }

    pub fn body_count(&self) -> usize {
        self.state.registry.len()
    }

    // --- Constraints ---

    pub fn add_constraint(
        &mut self,
        a: VisualId,
        b: VisualId,
        kind: ConstraintKind,
    ) -> Result<ConstraintId, ConstraintError> {
        self.state
            .constraints
            .create(&mut self.state.world, &self.state.registry, a, b, kind)
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<(), ConstraintError> {
        self.state.constraints.remove(&mut self.state.world, id)?;
        Ok(())
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&ConstraintBinding> {
        self.state.constraints.get(id)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintBinding> {
        self.state.constraints.iter()
    }

    pub fn set_rotary_limits(
        &mut self,
        id: ConstraintId,
        min: f32,
        max: f32,
    ) -> Result<(), ConstraintError> {
        self.state
            .constraints
            .set_rotary_limits(&mut self.state.world, id, min, max)
    }

    pub fn set_motor_rate(&mut self, id: ConstraintId, rate: f32) -> Result<(), ConstraintError> {
        self.state
            .constraints
            .set_motor_rate(&mut self.state.world, id, rate)
    }

    pub fn ratchet_angle(&self, id: ConstraintId) -> Option<f32> {
        self.state.constraints.ratchet_angle(id)
    }

    // --- Collision filtering and handlers ---

    /// Overwrite the filter on every shape of a binding
    pub fn set_filter(
        &mut self,
        id: VisualId,
        group: u32,
        categories: u32,
        mask: u32,
    ) -> Result<(), BindingError> {
        self.state.registry.set_filter(
            &mut self.state.world,
            id,
            CollisionFilter::new(group, categories, mask),
        )
    }

    pub fn set_collision_type(
        &mut self,
        id: VisualId,
        collision_type: u32,
    ) -> Result<(), BindingError> {
        self.state.registry.set_collision_type(id, collision_type)
    }

    pub fn set_shape_options(
        &mut self,
        id: VisualId,
        options: ShapeOptions,
    ) -> Result<(), BindingError> {
        self.state
            .registry
            .set_shape_options(&mut self.state.world, id, options)
    }

    /// Handlers for an unordered pair of collision types, replacing earlier ones
    pub fn register_collision_handler(
        &mut self,
        type_a: u32,
        type_b: u32,
        handler: CollisionHandler,
    ) {
        self.state
            .dispatcher
            .register_handler(type_a, type_b, handler);
    }

    /// Handlers for one collision type against any type without a pair handler
    pub fn register_wildcard_handler(&mut self, collision_type: u32, handler: CollisionHandler) {
        self.state
            .dispatcher
            .register_wildcard_handler(collision_type, handler);
    }

    // --- Custom integration ---

    /// Replace the default velocity update of a dynamic body.
    ///
    /// The callback runs before every substep and owns gravity: the body's gravity
    /// scale is parked until [`PhysicsSpace::clear_velocity_func`], and the
    /// scaled gravity is handed to the callback instead. Forces, contacts and
    /// damping still apply.
    pub fn set_velocity_func(
        &mut self,
        id: VisualId,
        func: impl FnMut(&mut VelocityUpdate) + 'static,
    ) -> Result<(), BindingError> {
        let parked = self.state.integrators.clear_velocity(id);
        let Some(body) = self.dynamic_body_mut(id, "velocity callback")? else {
            return Ok(());
        };
        let gravity_scale = parked.unwrap_or_else(|| body.gravity_scale());
        body.set_gravity_scale(0.0, true);
        self.state
            .integrators
            .set_velocity(id, Box::new(func), gravity_scale);
        log::debug!("Velocity callback installed on {}", id);
        Ok(())
    }

    /// Restore the default velocity update, `false` if none was installed
    pub fn clear_velocity_func(&mut self, id: VisualId) -> Result<bool, BindingError> {
        self.state.registry.get(id)?;
        let Some(gravity_scale) = self.state.integrators.clear_velocity(id) else {
            return Ok(false);
        };
        self.body_mut(id)?.set_gravity_scale(gravity_scale, true);
        Ok(true)
    }

    /// Let a callback correct the pose of a moving body after every substep
    pub fn set_position_func(
        &mut self,
        id: VisualId,
        func: impl FnMut(&mut PositionUpdate) + 'static,
    ) -> Result<(), BindingError> {
        let kind = self.state.registry.get(id)?.kind();
        if kind == BodyKind::Static {
            log::warn!("Ignoring position callback on static body {}", id);
            return Ok(());
        }
        self.state.integrators.set_position(id, Box::new(func));
        Ok(())
    }

    pub fn clear_position_func(&mut self, id: VisualId) -> Result<bool, BindingError> {
        self.state.registry.get(id)?;
        Ok(self.state.integrators.clear_position(id))
    }

    // --- Forces and velocities ---

    /// Mutable dynamic body, or `None` (with a warning) for other kinds
    fn dynamic_body_mut(
        &mut self,
        id: VisualId,
        action: &str,
    ) -> Result<Option<&mut RigidBody>, BindingError> {
        let binding = self.state.registry.get(id)?;
        if binding.kind() != BodyKind::Dynamic {
            log::warn!("Ignoring {} on {:?} body {}", action, binding.kind(), id);
            return Ok(None);
        }
        let body = self
            .state
            .world
            .get_rigid_body_mut(binding.body())
            .ok_or(BindingError::InvalidHandle(id))?;
        Ok(Some(body))
    }

    /// Apply a force at a world point; it acts over the whole next frame
    pub fn apply_force(
        &mut self,
        id: VisualId,
        force: Vec2,
        world_point: Vec2,
    ) -> Result<(), BindingError> {
        if let Some(body) = self.dynamic_body_mut(id, "force")? {
            body.add_force_at_point(to_vector(force), to_point(world_point), true);
        }
        Ok(())
    }

    pub fn apply_impulse(
        &mut self,
        id: VisualId,
        impulse: Vec2,
        world_point: Vec2,
    ) -> Result<(), BindingError> {
        if let Some(body) = self.dynamic_body_mut(id, "impulse")? {
            body.apply_impulse_at_point(to_vector(impulse), to_point(world_point), true);
        }
        Ok(())
    }

    /// Apply a force given in the visual's local frame at a local point
    pub fn apply_force_at_local_point(
        &mut self,
        id: VisualId,
        force: Vec2,
        local_point: Vec2,
    ) -> Result<(), BindingError> {
        let frame = self.state.registry.frame(&self.state.world, id)?;
        let force = Vec2::from_angle(frame.rotation).rotate(force);
        self.apply_force(id, force, frame.transform_point(local_point))
    }

    pub fn apply_impulse_at_local_point(
        &mut self,
        id: VisualId,
        impulse: Vec2,
        local_point: Vec2,
    ) -> Result<(), BindingError> {
        let frame = self.state.registry.frame(&self.state.world, id)?;
        let impulse = Vec2::from_angle(frame.rotation).rotate(impulse);
        self.apply_impulse(id, impulse, frame.transform_point(local_point))
    }

    pub fn velocity_at_world_point(
        &self,
        id: VisualId,
        world_point: Vec2,
    ) -> Result<Vec2, BindingError> {
        let (_, body) = self.state.registry.body(&self.state.world, id)?;
        Ok(from_vector(&body.velocity_at_point(&to_point(world_point))))
    }

    pub fn velocity_at_local_point(
        &self,
        id: VisualId,
        local_point: Vec2,
    ) -> Result<Vec2, BindingError> {
        let point = self.local_to_world(id, local_point)?;
        self.velocity_at_world_point(id, point)
    }

    pub fn velocity(&self, id: VisualId) -> Result<Vec2, BindingError> {
        let (_, body) = self.state.registry.body(&self.state.world, id)?;
        Ok(from_vector(body.linvel()))
    }

    pub fn angular_velocity(&self, id: VisualId) -> Result<f32, BindingError> {
        let (_, body) = self.state.registry.body(&self.state.world, id)?;
        Ok(body.angvel())
    }

    fn body_mut(&mut self, id: VisualId) -> Result<&mut RigidBody, BindingError> {
        let handle = self.state.registry.get(id)?.body();
        self.state
            .world
            .get_rigid_body_mut(handle)
            .ok_or(BindingError::InvalidHandle(id))
    }

    /// Set the linear velocity of a dynamic or kinematic body
    pub fn set_velocity(&mut self, id: VisualId, velocity: Vec2) -> Result<(), BindingError> {
        self.body_mut(id)?.set_linvel(to_vector(velocity), true);
        Ok(())
    }

    pub fn set_angular_velocity(
        &mut self,
        id: VisualId,
        angular_velocity: f32,
    ) -> Result<(), BindingError> {
        self.body_mut(id)?.set_angvel(angular_velocity, true);
        Ok(())
    }

    /// Wake a sleeping dynamic body
    pub fn activate(&mut self, id: VisualId) -> Result<(), BindingError> {
        if let Some(body) = self.dynamic_body_mut(id, "activate")? {
            body.wake_up(true);
        }
        Ok(())
    }

    /// Put a dynamic body to sleep until something touches it
    pub fn sleep(&mut self, id: VisualId) -> Result<(), BindingError> {
        if let Some(body) = self.dynamic_body_mut(id, "sleep")? {
            body.sleep();
        }
        Ok(())
    }

    pub fn is_sleeping(&self, id: VisualId) -> Result<bool, BindingError> {
        let (_, body) = self.state.registry.body(&self.state.world, id)?;
        Ok(body.is_sleeping())
    }

    // --- Coordinates and queries ---

    pub fn local_to_world(&self, id: VisualId, point: Vec2) -> Result<Vec2, BindingError> {
        self.state
            .registry
            .local_to_world(&self.state.world, id, point)
    }

    pub fn world_to_local(&self, id: VisualId, point: Vec2) -> Result<Vec2, BindingError> {
        self.state
            .registry
            .world_to_local(&self.state.world, id, point)
    }

    /// Nearest surface point of `id` when `point` lies inside it
    pub fn point_query(&self, id: VisualId, point: Vec2) -> Result<Option<PointHit>, BindingError> {
        query::point_query(&self.state.world, &self.state.registry, id, point)
    }

    /// Per-shape signed distance, nearest point and gradient, inside or outside
    pub fn point_query_info(
        &self,
        id: VisualId,
        point: Vec2,
    ) -> Result<Vec<PointHit>, BindingError> {
        query::point_query_info(&self.state.world, &self.state.registry, id, point)
    }

    /// First hit of the segment on `id`'s shapes, swept by `radius`
    pub fn line_query(
        &self,
        id: VisualId,
        start: Vec2,
        end: Vec2,
        radius: f32,
    ) -> Result<Option<SegmentHit>, BindingError> {
        query::line_query(&self.state.world, &self.state.registry, id, start, end, radius)
    }

    pub fn nearest_point_query(&self, point: Vec2, max_distance: f32) -> Option<PointHit> {
        query::nearest_point_query(&self.state.world, &self.state.registry, point, max_distance)
    }

    pub fn raycast(&self, start: Vec2, end: Vec2) -> Option<SegmentHit> {
        query::raycast(&self.state.world, &self.state.registry, start, end)
    }

    pub fn shape_contacts(
        &self,
        a: VisualId,
        b: VisualId,
    ) -> Result<Vec<ContactPoint>, BindingError> {
        query::shape_contacts(&self.state.world, &self.state.registry, a, b)
    }

    // --- Frame loop ---

    /// Step the simulation by `frame_duration` and write transforms back to `host`
    pub fn step_and_sync<H: VisualHost + ?Sized>(
        &mut self,
        host: &mut H,
        frame_duration: f32,
    ) -> FrameReport {
        self.scheduler
            .run_frame(&mut self.state, host, frame_duration)
    }

    pub fn pause(&mut self) {
        self.scheduler.pause();
    }

    pub fn resume(&mut self) {
        self.scheduler.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    pub fn phase(&self) -> SyncPhase {
        self.scheduler.phase()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Opt-in access to raw rapier objects
    pub fn advanced(&mut self) -> AdvancedAccess<'_> {
        AdvancedAccess {
            world: &mut self.state.world,
            registry: &self.state.registry,
            constraints: &self.state.constraints,
        }
    }
}

impl Default for PhysicsSpace {
    fn default() -> Self {
        Self::assemble(SpaceConfig::default())
    }
}

/// Borrowed handle onto engine internals.
///
/// Changes made here bypass the binding table; removing bodies or colliders
/// through it leaves dangling bindings that the next frame detaches.
pub struct AdvancedAccess<'a> {
    world: &'a mut PhysicsWorld,
    registry: &'a BodyRegistry,
    constraints: &'a ConstraintAdapter,
}

impl<'a> AdvancedAccess<'a> {
    pub fn rigid_body(&self, id: VisualId) -> Result<&RigidBody, BindingError> {
        Ok(self.registry.body(&*self.world, id)?.1)
    }

    pub fn rigid_body_mut(&mut self, id: VisualId) -> Result<&mut RigidBody, BindingError> {
        let handle = self.registry.get(id)?.body();
        self.world
            .get_rigid_body_mut(handle)
            .ok_or(BindingError::InvalidHandle(id))
    }

    pub fn colliders(&self, id: VisualId) -> Result<Vec<&Collider>, BindingError> {
        let binding = self.registry.get(id)?;
        Ok(binding
            .shapes()
            .iter()
            .filter_map(|h| self.world.get_collider(*h))
            .collect())
    }

    /// Mutable collider by its index within the binding's shapes
    pub fn collider_mut(
        &mut self,
        id: VisualId,
        index: usize,
    ) -> Result<Option<&mut Collider>, BindingError> {
        let handle = self.registry.get(id)?.shapes().get(index).copied();
        Ok(handle.and_then(|h| self.world.get_collider_mut(h)))
    }

    /// Rapier joint behind a constraint, `None` for solver-side kinds
    pub fn joint_mut(&mut self, id: ConstraintId) -> Option<&mut ImpulseJoint> {
        let handle = self.constraints.get(id)?.joint()?;
        self.world.get_impulse_joint_mut(handle)
    }

    pub fn integration_parameters_mut(&mut self) -> &mut IntegrationParameters {
        self.world.integration_parameters_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Transform2D;
    use crate::engine::physics::constraint::PinParams;
    use crate::engine::physics::collision::CollisionPhase;
    use crate::engine::scene::Scene;
    use crate::engine::shapes::VisualGeometry;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    const FRAME: f32 = 1.0 / 60.0;

    fn run(space: &mut PhysicsSpace, scene: &mut Scene, frames: usize) {
        for _ in 0..frames {
            space.step_and_sync(scene, FRAME);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            PhysicsSpace::new(SpaceConfig::new().with_substeps(0)),
            Err(ConfigError::InvalidSubsteps(0))
        ));
    }

    #[test]
    fn test_free_fall_matches_closed_form() {
        let mut space = PhysicsSpace::new(SpaceConfig::default()).unwrap();
        let mut scene = Scene::new();
        let ball = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.3));
        space.register_body(&ball, BodyKind::Dynamic).unwrap();

        run(&mut space, &mut scene, 60);

        let y = scene.transform(ball.id).unwrap().position.y;
        assert_relative_eq!(y, -4.905, max_relative = 0.05);
        assert_eq!(space.scheduler().frame_count(), 60);
        assert_eq!(space.scheduler().substep_count(), 480);
    }

    #[test]
    fn test_pin_distance_holds_under_force() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let a = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.2));
        let b = scene.spawn(
            Transform2D::from_position(Vec2::new(2.0, 0.0)),
            VisualGeometry::circle(0.2),
        );
        space.register_body(&a, BodyKind::Dynamic).unwrap();
        space.register_body(&b, BodyKind::Dynamic).unwrap();
        space
            .add_constraint(
                a.id,
                b.id,
                ConstraintKind::Pin(PinParams {
                    distance: Some(2.0),
                    ..Default::default()
                }),
            )
            .unwrap();

        for _ in 0..120 {
            let at = space.local_to_world(b.id, Vec2::ZERO).unwrap();
            space.apply_force(b.id, Vec2::new(3.0, 5.0), at).unwrap();
            space.step_and_sync(&mut scene, FRAME);

            let pa = scene.transform(a.id).unwrap().position;
            let pb = scene.transform(b.id).unwrap().position;
            assert_relative_eq!(pa.distance(pb), 2.0, epsilon = 0.05);
        }
    }

    #[test]
    fn test_same_group_never_begins_contact() {
        let begins = Rc::new(RefCell::new(0));
        let mut scene = Scene::new();
        let mut space = PhysicsSpace::new(SpaceConfig::new().with_gravity(Vec2::ZERO)).unwrap();

        let a = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let b = scene.spawn(
            Transform2D::from_position(Vec2::new(0.3, 0.0)),
            VisualGeometry::circle(0.5),
        );
        space.register_body(&a, BodyKind::Dynamic).unwrap();
        space.register_body(&b, BodyKind::Dynamic).unwrap();
        space.set_collision_type(a.id, 1).unwrap();
        space.set_collision_type(b.id, 2).unwrap();
        space.set_filter(a.id, 1, u32::MAX, 0xFFFF_FFFE).unwrap();
        space.set_filter(b.id, 1, u32::MAX, u32::MAX).unwrap();

        let counter = Rc::clone(&begins);
        space.register_collision_handler(
            1,
            2,
            CollisionHandler::new().on_begin(move |ctx| {
                assert_eq!(ctx.phase, CollisionPhase::Begin);
                *counter.borrow_mut() += 1;
                true
            }),
        );

        run(&mut space, &mut scene, 10);
        assert_eq!(*begins.borrow(), 0);

        // Different groups collide
        space.set_filter(b.id, 2, u32::MAX, u32::MAX).unwrap();
        run(&mut space, &mut scene, 2);
        assert!(*begins.borrow() > 0);
    }

    #[test]
    fn test_remove_body_releases_everything() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let a = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let b = scene.spawn(
            Transform2D::from_position(Vec2::new(2.0, 0.0)),
            VisualGeometry::circle(0.5),
        );
        space.register_body(&a, BodyKind::Static).unwrap();
        space.register_body(&b, BodyKind::Dynamic).unwrap();
        let pin = space
            .add_constraint(a.id, b.id, ConstraintKind::Pin(PinParams::default()))
            .unwrap();

        space.remove_body(b.id).unwrap();
        assert!(space.constraint(pin).is_none());
        assert_eq!(space.advanced().world.collider_count(), 1);
        assert!(matches!(
            space.world_to_local(b.id, Vec2::ZERO),
            Err(BindingError::NotBound(_))
        ));
        assert!(matches!(space.remove_body(b.id), Err(BindingError::NotBound(_))));
        assert!(matches!(
            space.register_body(&a, BodyKind::Static),
            Err(BindingError::AlreadyBound(_))
        ));
    }

    #[test]
    fn test_force_on_static_body_is_ignored() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let wall = scene.spawn(Transform2D::default(), VisualGeometry::rectangle(1.0, 1.0));
        space.register_body(&wall, BodyKind::Static).unwrap();

        space.apply_force(wall.id, Vec2::new(100.0, 0.0), Vec2::ZERO).unwrap();
        space.apply_impulse(wall.id, Vec2::new(100.0, 0.0), Vec2::ZERO).unwrap();
        run(&mut space, &mut scene, 5);
        assert_eq!(scene.transform(wall.id).unwrap(), wall.transform);
        assert!(space.apply_force(VisualId(99), Vec2::X, Vec2::ZERO).is_err());
    }

    #[test]
    fn test_local_impulse_and_velocity() {
        let mut space = PhysicsSpace::new(SpaceConfig::new().with_gravity(Vec2::ZERO)).unwrap();
        let mut scene = Scene::new();
        let ball = scene.spawn(
            Transform2D::new(Vec2::ZERO, std::f32::consts::FRAC_PI_2),
            VisualGeometry::circle(0.5),
        );
        space.register_body(&ball, BodyKind::Dynamic).unwrap();

        // Local +x points along world +y at a quarter turn
        space
            .apply_impulse_at_local_point(ball.id, Vec2::new(1.0, 0.0), Vec2::ZERO)
            .unwrap();
        let velocity = space.velocity(ball.id).unwrap();
        assert_relative_eq!(velocity.x, 0.0, epsilon = 1e-5);
        assert!(velocity.y > 0.0);

        space.set_angular_velocity(ball.id, 2.0).unwrap();
        let rim = space.velocity_at_local_point(ball.id, Vec2::new(0.5, 0.0)).unwrap();
        let expected = velocity + Vec2::new(-1.0, 0.0);
        assert_relative_eq!(rim.x, expected.x, epsilon = 1e-4);
        assert_relative_eq!(rim.y, expected.y, epsilon = 1e-4);
    }

    #[test]
    fn test_advanced_access() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let ball = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        space.register_body(&ball, BodyKind::Dynamic).unwrap();

        let mut advanced = space.advanced();
        assert_eq!(advanced.colliders(ball.id).unwrap().len(), 1);
        advanced.rigid_body_mut(ball.id).unwrap().set_gravity_scale(0.0, true);
        assert!(advanced.collider_mut(ball.id, 3).unwrap().is_none());

        run(&mut space, &mut scene, 10);
        assert_relative_eq!(scene.transform(ball.id).unwrap().position.y, 0.0, epsilon = 1e-5);
    }

    /// Static floor of collision type 2 with its top at y = -0.5, and a dynamic
    /// ball of type 1 and radius 0.5 at `ball_y`
    fn floor_and_ball(
        space: &mut PhysicsSpace,
        scene: &mut Scene,
        ball_y: f32,
    ) -> (VisualId, VisualId) {
        let floor = scene.spawn(
            Transform2D::from_position(Vec2::new(0.0, -1.0)),
            VisualGeometry::rectangle(10.0, 1.0),
        );
        let ball = scene.spawn(
            Transform2D::from_position(Vec2::new(0.0, ball_y)),
            VisualGeometry::circle(0.5),
        );
        space.register_body(&floor, BodyKind::Static).unwrap();
        space.register_body(&ball, BodyKind::Dynamic).unwrap();
        space.set_collision_type(ball.id, 1).unwrap();
        space.set_collision_type(floor.id, 2).unwrap();
        (floor.id, ball.id)
    }

    #[test]
    fn test_rejecting_begin_lets_ball_fall_through() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let (_, ball) = floor_and_ball(&mut space, &mut scene, 1.0);

        let separations = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&separations);
        space.register_collision_handler(
            1,
            2,
            CollisionHandler::new()
                .on_begin(|_| false)
                .on_separate(move |_| *counter.borrow_mut() += 1),
        );

        run(&mut space, &mut scene, 120);
        assert!(scene.transform(ball).unwrap().position.y < -2.5);
        assert_eq!(*separations.borrow(), 1);
    }

    #[test]
    fn test_accepting_begin_keeps_ball_on_floor() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let (_, ball) = floor_and_ball(&mut space, &mut scene, 1.0);
        space.register_collision_handler(1, 2, CollisionHandler::new().on_begin(|_| true));

        run(&mut space, &mut scene, 120);
        assert_relative_eq!(scene.transform(ball).unwrap().position.y, 0.0, epsilon = 0.05);
    }

    #[test]
    fn test_pre_solve_rejection_lets_ball_fall_through() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let (_, ball) = floor_and_ball(&mut space, &mut scene, 1.0);

        let pre_solves = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&pre_solves);
        space.register_wildcard_handler(
            1,
            CollisionHandler::new().on_pre_solve(move |ctx| {
                assert_eq!(ctx.type_a, 1);
                *counter.borrow_mut() += 1;
                false
            }),
        );

        run(&mut space, &mut scene, 120);
        assert!(scene.transform(ball).unwrap().position.y < -2.5);
        assert!(*pre_solves.borrow() > 0);
    }

    #[test]
    fn test_post_solve_reports_resting_impulse() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let (floor, ball) = floor_and_ball(&mut space, &mut scene, 0.0);

        let impulses = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&impulses);
        space.register_collision_handler(
            2,
            1,
            CollisionHandler::new().on_post_solve(move |ctx| {
                sink.borrow_mut().push((ctx.a, ctx.total_impulse));
            }),
        );

        run(&mut space, &mut scene, 30);
        let impulses = impulses.borrow();
        assert!(!impulses.is_empty());
        assert!(impulses.iter().all(|(a, _)| *a == floor));
        // Weight of the ball over one substep
        let (_, last) = impulses[impulses.len() - 1];
        let weight = std::f32::consts::PI * 0.25 * 9.81 / 480.0;
        assert_relative_eq!(last, weight, max_relative = 0.2);
        assert!(scene.transform(ball).unwrap().position.y > -0.1);
    }

    #[test]
    fn test_initial_force_acts_for_one_frame() {
        let mut space = PhysicsSpace::new(SpaceConfig::new().with_gravity(Vec2::ZERO)).unwrap();
        let mut scene = Scene::new();
        let ball = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let options = BodyOptions {
            mass: Some(2.0),
            force: Vec2::new(10.0, 0.0),
            ..Default::default()
        };
        space
            .register_body_with(
                &ball,
                BodyKind::Dynamic,
                BuildMode::Solid,
                &options,
                &ShapeOptions::default(),
            )
            .unwrap();

        run(&mut space, &mut scene, 1);
        let after_first = space.velocity(ball.id).unwrap().x;
        assert_relative_eq!(after_first, 10.0 / 2.0 * FRAME, epsilon = 1e-4);

        run(&mut space, &mut scene, 1);
        assert_relative_eq!(space.velocity(ball.id).unwrap().x, after_first, epsilon = 1e-6);
    }

    #[test]
    fn test_conveyor_carries_resting_box() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let belt = scene.spawn(
            Transform2D::from_position(Vec2::new(0.0, -1.0)),
            VisualGeometry::rectangle(10.0, 1.0),
        );
        let crate_box = scene.spawn(
            Transform2D::from_position(Vec2::new(0.0, -0.25)),
            VisualGeometry::rectangle(0.5, 0.5),
        );
        let grip = ShapeOptions::default().with_friction(1.0);
        space
            .register_body_with(
                &belt,
                BodyKind::Static,
                BuildMode::Solid,
                &BodyOptions::default(),
                &grip.with_surface_velocity(Vec2::new(2.0, 0.0)),
            )
            .unwrap();
        space
            .register_body_with(
                &crate_box,
                BodyKind::Dynamic,
                BuildMode::Solid,
                &BodyOptions::default(),
                &grip,
            )
            .unwrap();

        run(&mut space, &mut scene, 60);
        assert!(space.velocity(crate_box.id).unwrap().x > 1.5);
        assert!(scene.transform(crate_box.id).unwrap().position.x > 0.5);
    }

    #[test]
    fn test_velocity_func_owns_gravity() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let floating = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.3));
        let falling = scene.spawn(
            Transform2D::from_position(Vec2::new(3.0, 0.0)),
            VisualGeometry::circle(0.3),
        );
        space.register_body(&floating, BodyKind::Dynamic).unwrap();
        space.register_body(&falling, BodyKind::Dynamic).unwrap();

        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        space
            .set_velocity_func(floating.id, move |update| {
                assert_relative_eq!(update.gravity.y, -9.81);
                *counter.borrow_mut() += 1;
            })
            .unwrap();
        space
            .set_velocity_func(falling.id, |update| update.apply_gravity())
            .unwrap();

        run(&mut space, &mut scene, 60);
        assert_eq!(*calls.borrow(), 480);
        assert_relative_eq!(scene.transform(floating.id).unwrap().position.y, 0.0);
        let y = scene.transform(falling.id).unwrap().position.y;
        assert_relative_eq!(y, -4.905, max_relative = 0.05);

        // Default update and gravity come back
        assert!(space.clear_velocity_func(floating.id).unwrap());
        assert!(!space.clear_velocity_func(floating.id).unwrap());
        run(&mut space, &mut scene, 10);
        assert!(scene.transform(floating.id).unwrap().position.y < 0.0);
    }

    #[test]
    fn test_position_func_clamps_pose() {
        let mut space = PhysicsSpace::default();
        let mut scene = Scene::new();
        let ball = scene.spawn(
            Transform2D::from_position(Vec2::new(0.0, 2.0)),
            VisualGeometry::circle(0.3),
        );
        space.register_body(&ball, BodyKind::Dynamic).unwrap();
        space
            .set_position_func(ball.id, |update| {
                if update.position.y < 0.0 {
                    update.position.y = 0.0;
                    update.velocity.y = 0.0;
                }
            })
            .unwrap();

        run(&mut space, &mut scene, 120);
        assert_relative_eq!(scene.transform(ball.id).unwrap().position.y, 0.0, epsilon = 1e-4);

        space.remove_body(ball.id).unwrap();
        assert!(space.state.integrators.is_empty());
    }
}
