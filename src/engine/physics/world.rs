use glam::Vec2;
use rapier2d::prelude::*;

use super::collision::{
    CollisionEvent, CollisionEventQueue, ContactOverrides, SpaceHooks, TouchingPair,
};
use super::config::SpaceConfig;
use crate::core::math::{from_vector, to_point, to_vector};

/// Owns every rapier set and pipeline stage of one simulation
pub struct PhysicsWorld {
    gravity: Vector<Real>,

    /// `dt` is rewritten for every substep
    integration_parameters: IntegrationParameters,

    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,

    /// Events captured since the last drain
    collision_event_queue: CollisionEventQueue,

    /// Rejected pairs and surface velocities, shared with `hooks`
    contact_overrides: ContactOverrides,

    hooks: SpaceHooks,
}

impl PhysicsWorld {
    /// Create a world from space settings
    pub fn new(config: &SpaceConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = 1.0 / (60.0 * config.substeps.max(1) as Real);

        let contact_overrides = ContactOverrides::new();
        Self {
            gravity: to_vector(config.gravity),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            collision_event_queue: CollisionEventQueue::new(),
            hooks: SpaceHooks::new(contact_overrides.clone()),
            contact_overrides,
        }
    }

    /// Advance the simulation by `dt` seconds
    pub fn step(&mut self, dt: Real) {
        self.integration_parameters.dt = dt;

        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &self.hooks,
            &self.collision_event_queue,
        );
    }

    /// Take the collision events produced since the last drain
    pub fn drain_collision_events(&self) -> Vec<CollisionEvent> {
        self.collision_event_queue.drain()
    }

    pub fn contact_overrides(&self) -> &ContactOverrides {
        &self.contact_overrides
    }

    /// Collider pairs with at least one active contact after the last step
    pub fn touching_pairs(&self) -> Vec<TouchingPair> {
        self.narrow_phase
            .contact_pairs()
            .filter(|pair| pair.has_any_active_contact)
            .map(|pair| TouchingPair {
                collider1: pair.collider1,
                collider2: pair.collider2,
                impulse: pair.total_impulse_magnitude(),
            })
            .collect()
    }

    /// Clear user forces and torques on every body
    pub fn reset_forces(&mut self) {
        for (_, body) in self.rigid_body_set.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }
    }

    /// Add a rigid body to the physics world
    pub fn add_rigid_body(&mut self, body: RigidBody) -> RigidBodyHandle {
        self.rigid_body_set.insert(body)
    }

    /// Add a collider attached to a rigid body
    pub fn add_collider(
        &mut self,
        collider: Collider,
        parent_handle: RigidBodyHandle,
    ) -> ColliderHandle {
        self.collider_set
            .insert_with_parent(collider, parent_handle, &mut self.rigid_body_set)
    }

    /// Remove a rigid body with its colliders and joints, `false` if it was already gone
    pub fn remove_rigid_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true, // remove attached colliders
            )
            .is_some()
    }

    /// Refresh a body's mass and inertia from its colliders now rather than at the next step
    pub fn recompute_mass_properties(&mut self, handle: RigidBodyHandle) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.recompute_mass_properties_from_colliders(&self.collider_set);
        }
    }

    /// Replace the collider-derived center of mass and/or moment of inertia.
    ///
    /// The mass stays the colliders' total, so their density or mass must be set
    /// on entry. Collider densities are zeroed afterwards and the whole
    /// distribution lives in the body's additional mass properties.
    pub fn override_mass_properties(
        &mut self,
        handle: RigidBodyHandle,
        local_com: Option<Vec2>,
        moment: Option<f32>,
    ) {
        let Some(body) = self.rigid_body_set.get_mut(handle) else {
            return;
        };
        body.set_additional_mass_properties(MassProperties::default(), false);
        body.recompute_mass_properties_from_colliders(&self.collider_set);

        let derived = body.mass_properties().local_mprops;
        let props = MassProperties::new(
            local_com.map(to_point).unwrap_or(derived.local_com),
            derived.mass(),
            moment.unwrap_or_else(|| derived.principal_inertia()),
        );
        for collider in body.colliders().to_vec() {
            if let Some(collider) = self.collider_set.get_mut(collider) {
                collider.set_density(0.0);
            }
        }

        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.set_additional_mass_properties(props, true);
            body.recompute_mass_properties_from_colliders(&self.collider_set);
        }
    }

    /// Join two bodies with a joint
    pub fn add_impulse_joint(
        &mut self,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        joint: impl Into<GenericJoint>,
    ) -> ImpulseJointHandle {
        self.impulse_joint_set.insert(body1, body2, joint, true)
    }

    pub fn remove_impulse_joint(&mut self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joint_set.remove(handle, true).is_some()
    }

    pub fn get_impulse_joint_mut(
        &mut self,
        handle: ImpulseJointHandle,
    ) -> Option<&mut ImpulseJoint> {
        self.impulse_joint_set.get_mut(handle)
    }

    pub fn get_rigid_body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.rigid_body_set.get(handle)
    }

    /// Get a mutable reference to a rigid body
    pub fn get_rigid_body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.rigid_body_set.get_mut(handle)
    }

    pub fn get_collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.collider_set.get(handle)
    }

    /// Get a mutable reference to a collider
    pub fn get_collider_mut(&mut self, handle: ColliderHandle) -> Option<&mut Collider> {
        self.collider_set.get_mut(handle)
    }

    pub fn colliders(&self) -> &ColliderSet {
        &self.collider_set
    }

    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    pub fn collider_count(&self) -> usize {
        self.collider_set.len()
    }

    pub fn impulse_joint_count(&self) -> usize {
        self.impulse_joint_set.len()
    }

    /// Set gravity for the physics world
    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = to_vector(gravity);
    }

    /// Get current gravity
    pub fn gravity(&self) -> Vec2 {
        from_vector(&self.gravity)
    }

    pub fn integration_parameters_mut(&mut self) -> &mut IntegrationParameters {
        &mut self.integration_parameters
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(&SpaceConfig::default())
    }
}
