// Binding table between visual objects and physics bodies

use glam::Vec2;
use std::collections::{BTreeMap, HashMap};

use super::body::{build_colliders, BodyBuilder, BodyKind, BodyOptions, ShapeOptions};
use super::collision::{CollisionFilter, ShapeOwner};
use super::world::PhysicsWorld;
use crate::core::math::{from_isometry, to_vector, Transform2D};
use crate::engine::scene::{VisualId, VisualObject};
use crate::engine::shapes::{ShapeDescriptor, ShapeError};
use rapier2d::prelude::{ColliderHandle, Isometry, RigidBody, RigidBodyHandle};

/// Errors from the binding API
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("{0} is already bound to a physics body")]
    AlreadyBound(VisualId),

    #[error("{0} is not bound to a physics body")]
    NotBound(VisualId),

    #[error("Physics body of {0} is no longer in the space")]
    InvalidHandle(VisualId),

    #[error("Cannot build shapes: {0}")]
    Shape(#[from] ShapeError),
}

/// Fixed-schema record linking one visual object to its body and shapes
#[derive(Debug, Clone)]
pub struct VisualObjectBinding {
    visual_id: VisualId,
    body: RigidBodyHandle,
    shapes: Vec<ColliderHandle>,
    angle_offset: f32,
    kind: BodyKind,
    filter: CollisionFilter,
    shape_options: ShapeOptions,
    /// Total mass given at registration, spread over the shapes
    body_mass: Option<f32>,
    /// Center of gravity (body frame) and moment replacing the shape-derived ones
    mass_override: Option<(Option<Vec2>, Option<f32>)>,
    /// Visual transform as of the last write-back (or registration)
    pub(crate) last_synced: Transform2D,
}

impl VisualObjectBinding {
    pub fn visual_id(&self) -> VisualId {
        self.visual_id
    }

    pub fn body(&self) -> RigidBodyHandle {
        self.body
    }

    /// Attached shapes, never empty
    pub fn shapes(&self) -> &[ColliderHandle] {
        &self.shapes
    }

    pub fn angle_offset(&self) -> f32 {
        self.angle_offset
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn filter(&self) -> CollisionFilter {
        self.filter
    }

    pub fn collision_type(&self) -> u32 {
        self.shape_options.collision_type
    }

    pub fn shape_options(&self) -> &ShapeOptions {
        &self.shape_options
    }

    /// Body pose expressed in the visual's frame (angle offset applied)
    pub fn frame(&self, body: &RigidBody) -> Transform2D {
        let pose = from_isometry(body.position());
        Transform2D::new(pose.position, pose.rotation + self.angle_offset)
    }

    /// Rotate a vector from the visual's local frame into the body's frame
    pub fn to_body_frame(&self, local: Vec2) -> Vec2 {
        Vec2::from_angle(self.angle_offset).rotate(local)
    }
}

/// Owns every binding and the reverse lookup from shapes to visuals
#[derive(Debug, Default)]
pub struct BodyRegistry {
    bindings: BTreeMap<VisualId, VisualObjectBinding>,
    shape_owners: HashMap<ColliderHandle, VisualId>,
    sleep_time: Option<f32>,
}

impl BodyRegistry {
    pub fn new(sleep_time: Option<f32>) -> Self {
        Self {
            sleep_time,
            ..Self::default()
        }
    }

    /// Create a body for `object` and attach shapes built from `descriptors`
    pub fn attach(
        &mut self,
        world: &mut PhysicsWorld,
        object: &VisualObject,
        kind: BodyKind,
        descriptors: &[ShapeDescriptor],
        body_options: &BodyOptions,
        shape_options: &ShapeOptions,
    ) -> Result<&VisualObjectBinding, BindingError> {
        if self.bindings.contains_key(&object.id) {
            return Err(BindingError::AlreadyBound(object.id));
        }

        let filter = CollisionFilter::default();
        let colliders = build_colliders(descriptors, shape_options, filter, body_options.mass)?;

        let body = BodyBuilder::from_options(kind, body_options)
            .position_rotation(
                object.transform.position,
                object.transform.rotation - body_options.angle_offset,
            )
            .sleep_time(self.sleep_time)
            .build();
        let body = world.add_rigid_body(body);

        // Descriptors are in the visual's frame, which sits at `angle_offset` in the body's
        let offset = Isometry::rotation(body_options.angle_offset);
        let shapes: Vec<ColliderHandle> = colliders
            .into_iter()
            .map(|mut collider| {
                collider.set_position(offset);
                world.add_collider(collider, body)
            })
            .collect();
        for shape in &shapes {
            self.shape_owners.insert(*shape, object.id);
        }
        world.recompute_mass_properties(body);

        let offset_cog = body_options
            .center_of_gravity
            .map(|cog| Vec2::from_angle(body_options.angle_offset).rotate(cog));
        let overridden = body_options.moment.is_some() || offset_cog.is_some();
        let mass_override =
            (kind == BodyKind::Dynamic && overridden).then_some((offset_cog, body_options.moment));
        if let Some((cog, moment)) = mass_override {
            world.override_mass_properties(body, cog, moment);
        }
        if kind == BodyKind::Dynamic {
            if let Some(rb) = world.get_rigid_body_mut(body) {
                rb.add_force(to_vector(body_options.force), true);
                rb.add_torque(body_options.torque, true);
            }
        }
        for shape in &shapes {
            world
                .contact_overrides()
                .set_surface_velocity(*shape, shape_options.surface_velocity);
        }

        log::info!(
            "Registered {} as {:?} body with {} shape(s)",
            object.id,
            kind,
            shapes.len()
        );

        let binding = VisualObjectBinding {
            visual_id: object.id,
            body,
            shapes,
            angle_offset: body_options.angle_offset,
            kind,
            filter,
            shape_options: *shape_options,
            body_mass: body_options.mass,
            mass_override,
            last_synced: object.transform,
        };
        Ok(self.bindings.entry(object.id).or_insert(binding))
    }

    /// Remove the binding and release its body and shapes from the world
    pub fn detach(
        &mut self,
        world: &mut PhysicsWorld,
        id: VisualId,
    ) -> Result<VisualObjectBinding, BindingError> {
        let binding = self.bindings.remove(&id).ok_or(BindingError::NotBound(id))?;
        for shape in &binding.shapes {
            self.shape_owners.remove(shape);
            world.contact_overrides().forget_collider(*shape);
        }
        if !world.remove_rigid_body(binding.body) {
            log::warn!("Body of {} was already gone from the space", id);
        }
        log::info!("Removed {} from the simulation", id);
        Ok(binding)
    }

    pub fn get(&self, id: VisualId) -> Result<&VisualObjectBinding, BindingError> {
        self.bindings.get(&id).ok_or(BindingError::NotBound(id))
    }

    pub(crate) fn get_mut(
        &mut self,
        id: VisualId,
    ) -> Result<&mut VisualObjectBinding, BindingError> {
        self.bindings.get_mut(&id).ok_or(BindingError::NotBound(id))
    }

    pub fn contains(&self, id: VisualId) -> bool {
        self.bindings.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bound visual ids in ascending order
    pub fn ids(&self) -> Vec<VisualId> {
        self.bindings.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisualObjectBinding> {
        self.bindings.values()
    }

    /// Resolve a collider to its owning visual and collision type
    pub fn owner_of(&self, shape: ColliderHandle) -> Option<ShapeOwner> {
        let visual = *self.shape_owners.get(&shape)?;
        let binding = self.bindings.get(&visual)?;
        Some(ShapeOwner {
            visual,
            collision_type: binding.collision_type(),
        })
    }

    /// The binding and its live rigid body
    pub fn body<'w>(
        &self,
        world: &'w PhysicsWorld,
        id: VisualId,
    ) -> Result<(&VisualObjectBinding, &'w RigidBody), BindingError> {
        let binding = self.get(id)?;
        let body = world
            .get_rigid_body(binding.body)
            .ok_or(BindingError::InvalidHandle(id))?;
        Ok((binding, body))
    }

    /// Current pose of the visual's frame as driven by the body
    pub fn frame(&self, world: &PhysicsWorld, id: VisualId) -> Result<Transform2D, BindingError> {
        let (binding, body) = self.body(world, id)?;
        Ok(binding.frame(body))
    }

    pub fn local_to_world(
        &self,
        world: &PhysicsWorld,
        id: VisualId,
        point: Vec2,
    ) -> Result<Vec2, BindingError> {
        Ok(self.frame(world, id)?.transform_point(point))
    }

    pub fn world_to_local(
        &self,
        world: &PhysicsWorld,
        id: VisualId,
        point: Vec2,
    ) -> Result<Vec2, BindingError> {
        Ok(self.frame(world, id)?.inverse_transform_point(point))
    }

    /// Overwrite the collision filter on every shape of a binding
    pub fn set_filter(
        &mut self,
        world: &mut PhysicsWorld,
        id: VisualId,
        filter: CollisionFilter,
    ) -> Result<(), BindingError> {
        let binding = self.get_mut(id)?;
        binding.filter = filter;
        for shape in &binding.shapes {
            if let Some(collider) = world.get_collider_mut(*shape) {
                collider.set_collision_groups(filter.to_interaction_groups());
                collider.user_data = filter.user_data();
            }
        }
        log::debug!("Filter of {} set to {:?}", id, filter);
        Ok(())
    }

    pub fn set_collision_type(
        &mut self,
        id: VisualId,
        collision_type: u32,
    ) -> Result<(), BindingError> {
        self.get_mut(id)?.shape_options.collision_type = collision_type;
        Ok(())
    }

    /// Reapply material settings to every shape of a binding
    pub fn set_shape_options(
        &mut self,
        world: &mut PhysicsWorld,
        id: VisualId,
        options: ShapeOptions,
    ) -> Result<(), BindingError> {
        let binding = self.get_mut(id)?;
        binding.shape_options = options;

        let count = binding.shapes.len() as f32;
        for shape in &binding.shapes {
            if let Some(collider) = world.get_collider_mut(*shape) {
                collider.set_friction(options.friction);
                collider.set_restitution(options.elasticity);
                collider.set_sensor(options.sensor);
                collider.set_active_hooks(options.active_hooks());
                match binding.body_mass.or(options.mass) {
                    Some(mass) => collider.set_mass(mass / count),
                    None => collider.set_density(options.density),
                }
            }
            world
                .contact_overrides()
                .set_surface_velocity(*shape, options.surface_velocity);
        }
        world.recompute_mass_properties(binding.body);
        if let Some((cog, moment)) = binding.mass_override {
            world.override_mass_properties(binding.body, cog, moment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scene::Scene;
    use crate::engine::shapes::VisualGeometry;
    use approx::assert_relative_eq;

    fn circle() -> Vec<ShapeDescriptor> {
        vec![ShapeDescriptor::Circle { radius: 0.5 }]
    }

    #[test]
    fn test_attach_and_detach() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let mut scene = Scene::new();
        let object = scene.spawn(
            Transform2D::new(Vec2::new(1.0, 2.0), 0.3),
            VisualGeometry::circle(0.5),
        );

        let binding = registry
            .attach(
                &mut world,
                &object,
                BodyKind::Dynamic,
                &circle(),
                &BodyOptions::default(),
                &ShapeOptions::default(),
            )
            .unwrap();
        assert_eq!(binding.shapes().len(), 1);
        let shape = binding.shapes()[0];
        assert_eq!(registry.owner_of(shape).unwrap().visual, object.id);
        assert_eq!(world.collider_count(), 1);

        let frame = registry.frame(&world, object.id).unwrap();
        assert!(frame.approx_eq(&object.transform, 1e-6));

        registry.detach(&mut world, object.id).unwrap();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.collider_count(), 0);
        assert!(registry.owner_of(shape).is_none());
        assert!(matches!(
            registry.detach(&mut world, object.id),
            Err(BindingError::NotBound(_))
        ));
        assert!(matches!(
            registry.local_to_world(&world, object.id, Vec2::ZERO),
            Err(BindingError::NotBound(_))
        ));
    }

    #[test]
    fn test_double_attach_rejected() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let attach = |registry: &mut BodyRegistry, world: &mut PhysicsWorld| {
            registry
                .attach(
                    world,
                    &object,
                    BodyKind::Static,
                    &circle(),
                    &BodyOptions::default(),
                    &ShapeOptions::default(),
                )
                .map(|b| b.visual_id())
        };

        assert!(attach(&mut registry, &mut world).is_ok());
        assert!(matches!(
            attach(&mut registry, &mut world),
            Err(BindingError::AlreadyBound(_))
        ));
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn test_angle_offset_frame() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(
            Transform2D::new(Vec2::ZERO, 1.0),
            VisualGeometry::circle(0.5),
        );
        let options = BodyOptions {
            angle_offset: 0.25,
            ..Default::default()
        };
        registry
            .attach(
                &mut world,
                &object,
                BodyKind::Dynamic,
                &circle(),
                &options,
                &ShapeOptions::default(),
            )
            .unwrap();

        let (binding, body) = registry.body(&world, object.id).unwrap();
        assert_relative_eq!(body.rotation().angle(), 0.75, epsilon = 1e-6);
        assert_relative_eq!(binding.frame(body).rotation, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_offset_shapes_keep_visual_orientation() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object =
            Scene::new().spawn(Transform2D::default(), VisualGeometry::rectangle(2.0, 0.2));
        let bar = ShapeDescriptor::Solid {
            vertices: vec![
                Vec2::new(-1.0, -0.1),
                Vec2::new(1.0, -0.1),
                Vec2::new(1.0, 0.1),
                Vec2::new(-1.0, 0.1),
            ],
            radius: 0.0,
        };
        registry
            .attach(
                &mut world,
                &object,
                BodyKind::Static,
                &[bar],
                &BodyOptions {
                    angle_offset: 0.5,
                    ..Default::default()
                },
                &ShapeOptions::default(),
            )
            .unwrap();

        let shape = registry.get(object.id).unwrap().shapes()[0];
        let collider = world.get_collider(shape).unwrap();
        assert_relative_eq!(collider.position().rotation.angle(), 0.0, epsilon = 1e-6);
        let aabb = collider.compute_aabb();
        assert_relative_eq!(aabb.maxs.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(aabb.maxs.y, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_local_world_round_trip() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(
            Transform2D::new(Vec2::new(-3.0, 4.0), 2.2),
            VisualGeometry::circle(0.5),
        );
        registry
            .attach(
                &mut world,
                &object,
                BodyKind::Kinematic,
                &circle(),
                &BodyOptions {
                    angle_offset: -0.4,
                    ..Default::default()
                },
                &ShapeOptions::default(),
            )
            .unwrap();

        for p in [Vec2::ZERO, Vec2::new(1.0, -2.0), Vec2::new(10.0, 0.5)] {
            let world_p = registry.local_to_world(&world, object.id, p).unwrap();
            let back = registry.world_to_local(&world, object.id, world_p).unwrap();
            assert_relative_eq!(back.x, p.x, epsilon = 1e-4);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_failed_shape_build_leaves_no_body() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let result = registry.attach(
            &mut world,
            &object,
            BodyKind::Dynamic,
            &[],
            &BodyOptions::default(),
            &ShapeOptions::default(),
        );
        assert!(matches!(result, Err(BindingError::Shape(_))));
        assert_eq!(world.body_count(), 0);
        assert!(!registry.contains(object.id));
    }

    #[test]
    fn test_set_filter_updates_colliders() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        registry
            .attach(
                &mut world,
                &object,
                BodyKind::Dynamic,
                &circle(),
                &BodyOptions::default(),
                &ShapeOptions::default(),
            )
            .unwrap();

        let filter = CollisionFilter::new(4, 0b10, 0b01);
        registry.set_filter(&mut world, object.id, filter).unwrap();

        let shape = registry.get(object.id).unwrap().shapes()[0];
        let collider = world.get_collider(shape).unwrap();
        assert_eq!(collider.user_data, 4);
        assert_eq!(collider.collision_groups().filter.bits(), 0b01);
        assert_eq!(registry.get(object.id).unwrap().filter(), filter);
    }

    #[test]
    fn test_moment_and_center_of_gravity_override() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let options = BodyOptions {
            moment: Some(10.0),
            center_of_gravity: Some(Vec2::new(0.2, 0.0)),
            angle_offset: std::f32::consts::FRAC_PI_2,
            ..Default::default()
        };
        registry
            .attach(
                &mut world,
                &object,
                BodyKind::Dynamic,
                &circle(),
                &options,
                &ShapeOptions::default(),
            )
            .unwrap();

        let check = |world: &PhysicsWorld, registry: &BodyRegistry| {
            let (_, body) = registry.body(world, object.id).unwrap();
            let props = body.mass_properties().local_mprops;
            assert_relative_eq!(props.principal_inertia(), 10.0, epsilon = 1e-3);
            assert_relative_eq!(props.mass(), std::f32::consts::PI * 0.25, epsilon = 1e-4);
            // Visual +x is body +y with a quarter-turn offset
            assert_relative_eq!(props.local_com.x, 0.0, epsilon = 1e-5);
            assert_relative_eq!(props.local_com.y, 0.2, epsilon = 1e-5);
        };
        check(&world, &registry);

        // Material changes keep the override
        registry
            .set_shape_options(&mut world, object.id, ShapeOptions::material())
            .unwrap();
        check(&world, &registry);
    }

    #[test]
    fn test_surface_velocity_follows_shape_options() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let object = Scene::new().spawn(Transform2D::default(), VisualGeometry::circle(0.5));
        let belt = ShapeOptions::default().with_surface_velocity(Vec2::new(-1.0, 0.0));
        registry
            .attach(
                &mut world,
                &object,
                BodyKind::Static,
                &circle(),
                &BodyOptions::default(),
                &belt,
            )
            .unwrap();
        let shape = registry.get(object.id).unwrap().shapes()[0];
        assert_eq!(world.contact_overrides().surface_velocity(shape), Vec2::new(-1.0, 0.0));

        registry
            .set_shape_options(&mut world, object.id, ShapeOptions::default())
            .unwrap();
        assert_eq!(world.contact_overrides().surface_velocity(shape), Vec2::ZERO);

        registry.set_shape_options(&mut world, object.id, belt).unwrap();
        registry.detach(&mut world, object.id).unwrap();
        assert_eq!(world.contact_overrides().surface_velocity(shape), Vec2::ZERO);
    }

    #[test]
    fn test_initial_force_is_applied_to_dynamic_bodies() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let options = BodyOptions {
            force: Vec2::new(3.0, 0.0),
            torque: 1.5,
            ..Default::default()
        };
        let mut scene = Scene::new();
        let mut attach = |kind: BodyKind| {
            let object = scene.spawn(Transform2D::default(), VisualGeometry::circle(0.5));
            registry
                .attach(&mut world, &object, kind, &circle(), &options, &ShapeOptions::default())
                .map(|binding| binding.body())
                .unwrap()
        };
        let dynamic = attach(BodyKind::Dynamic);
        let kinematic = attach(BodyKind::Kinematic);

        let body = world.get_rigid_body(dynamic).unwrap();
        assert_relative_eq!(body.user_force().x, 3.0);
        assert_relative_eq!(body.user_torque(), 1.5);
        assert_relative_eq!(world.get_rigid_body(kinematic).unwrap().user_force().x, 0.0);
    }
}
