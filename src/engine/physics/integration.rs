// Per-body velocity and position callbacks run around every substep

use glam::Vec2;
use rapier2d::prelude::Isometry;
use std::collections::BTreeMap;

use super::registry::BodyRegistry;
use super::world::PhysicsWorld;
use crate::core::math::{from_vector, to_vector};
use crate::engine::scene::VisualId;

/// Velocity state handed to a velocity callback before a substep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityUpdate {
    pub velocity: Vec2,
    pub angular_velocity: f32,

    /// Gravity the body would receive this substep: space gravity times its gravity scale.
    /// Not applied unless the callback calls [`VelocityUpdate::apply_gravity`].
    pub gravity: Vec2,

    pub dt: f32,
}

impl VelocityUpdate {
    /// Integrate gravity the way the default update does
    pub fn apply_gravity(&mut self) {
        self.velocity += self.gravity * self.dt;
    }
}

/// Pose of the visual's frame after a substep, handed to a position callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub position: Vec2,

    /// Rotation of the visual (angle offset applied)
    pub rotation: f32,

    pub velocity: Vec2,
    pub angular_velocity: f32,
    pub dt: f32,
}

pub type VelocityFunc = Box<dyn FnMut(&mut VelocityUpdate)>;
pub type PositionFunc = Box<dyn FnMut(&mut PositionUpdate)>;

struct VelocityEntry {
    func: VelocityFunc,

    /// Gravity scale the body had before the callback took over gravity
    gravity_scale: f32,
}

/// Custom integration callbacks keyed by visual
#[derive(Default)]
pub struct IntegrationFuncs {
    velocity: BTreeMap<VisualId, VelocityEntry>,
    position: BTreeMap<VisualId, PositionFunc>,
}

impl IntegrationFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a velocity callback, returning the gravity scale of the one it replaced
    pub(crate) fn set_velocity(
        &mut self,
        id: VisualId,
        func: VelocityFunc,
        gravity_scale: f32,
    ) -> Option<f32> {
        self.velocity
            .insert(id, VelocityEntry { func, gravity_scale })
            .map(|previous| previous.gravity_scale)
    }

    /// Remove a velocity callback, returning the gravity scale to restore
    pub(crate) fn clear_velocity(&mut self, id: VisualId) -> Option<f32> {
        self.velocity.remove(&id).map(|entry| entry.gravity_scale)
    }

    pub(crate) fn set_position(&mut self, id: VisualId, func: PositionFunc) {
        self.position.insert(id, func);
    }

    pub(crate) fn clear_position(&mut self, id: VisualId) -> bool {
        self.position.remove(&id).is_some()
    }

    pub fn has_velocity_func(&self, id: VisualId) -> bool {
        self.velocity.contains_key(&id)
    }

    pub fn has_position_func(&self, id: VisualId) -> bool {
        self.position.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty() && self.position.is_empty()
    }

    /// Drop callbacks whose visual is no longer bound
    pub(crate) fn retain_bound(&mut self, registry: &BodyRegistry) {
        self.velocity.retain(|id, _| registry.contains(*id));
        self.position.retain(|id, _| registry.contains(*id));
    }

    /// Let every velocity callback rewrite its body's velocity before the substep
    pub(crate) fn run_velocity(
        &mut self,
        world: &mut PhysicsWorld,
        registry: &BodyRegistry,
        dt: f32,
    ) {
        let gravity = world.gravity();
        for (id, entry) in self.velocity.iter_mut() {
            let Ok(binding) = registry.get(*id) else {
                continue;
            };
            let Some(body) = world.get_rigid_body_mut(binding.body()) else {
                continue;
            };
            let mut update = VelocityUpdate {
                velocity: from_vector(body.linvel()),
                angular_velocity: body.angvel(),
                gravity: gravity * entry.gravity_scale,
                dt,
            };
            (entry.func)(&mut update);
            body.set_linvel(to_vector(update.velocity), true);
            body.set_angvel(update.angular_velocity, true);
        }
    }

    /// Let every position callback correct its body's pose after the substep
    pub(crate) fn run_position(
        &mut self,
        world: &mut PhysicsWorld,
        registry: &BodyRegistry,
        dt: f32,
    ) {
        for (id, func) in self.position.iter_mut() {
            let Ok(binding) = registry.get(*id) else {
                continue;
            };
            let Some(body) = world.get_rigid_body_mut(binding.body()) else {
                continue;
            };
            let frame = binding.frame(body);
            let before = PositionUpdate {
                position: frame.position,
                rotation: frame.rotation,
                velocity: from_vector(body.linvel()),
                angular_velocity: body.angvel(),
                dt,
            };
            let mut update = before;
            func(&mut update);
            if update == before {
                continue;
            }

            if update.position != before.position || update.rotation != before.rotation {
                let angle = update.rotation - binding.angle_offset();
                body.set_position(Isometry::new(to_vector(update.position), angle), false);
            }
            body.set_linvel(to_vector(update.velocity), false);
            body.set_angvel(update.angular_velocity, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Transform2D;
    use crate::engine::physics::body::{BodyKind, BodyOptions, ShapeOptions};
    use crate::engine::scene::Scene;
    use crate::engine::shapes::{ShapeDescriptor, VisualGeometry};
    use approx::assert_relative_eq;

    fn ball(world: &mut PhysicsWorld, registry: &mut BodyRegistry, at: Vec2) -> VisualId {
        let transform = Transform2D::from_position(at);
        let object = Scene::new().spawn(transform, VisualGeometry::circle(0.5));
        registry
            .attach(
                world,
                &object,
                BodyKind::Dynamic,
                &[ShapeDescriptor::Circle { radius: 0.5 }],
                &BodyOptions::default(),
                &ShapeOptions::default(),
            )
            .map(|binding| binding.visual_id())
            .unwrap()
    }

    #[test]
    fn test_velocity_callback_sees_scaled_gravity() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let id = ball(&mut world, &mut registry, Vec2::ZERO);

        let mut funcs = IntegrationFuncs::new();
        funcs.set_velocity(
            id,
            Box::new(|update: &mut VelocityUpdate| {
                update.apply_gravity();
                update.angular_velocity = 1.0;
            }),
            0.5,
        );
        funcs.run_velocity(&mut world, &registry, 0.1);

        let (_, body) = registry.body(&world, id).unwrap();
        assert_relative_eq!(body.linvel().y, -9.81 * 0.5 * 0.1, epsilon = 1e-5);
        assert_relative_eq!(body.angvel(), 1.0);
    }

    #[test]
    fn test_position_callback_moves_body() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let id = ball(&mut world, &mut registry, Vec2::new(0.0, -2.0));

        let mut funcs = IntegrationFuncs::new();
        funcs.set_position(
            id,
            Box::new(|update: &mut PositionUpdate| {
                update.position.y = update.position.y.max(0.0);
            }),
        );
        funcs.run_position(&mut world, &registry, 0.1);

        let frame = registry.frame(&world, id).unwrap();
        assert_relative_eq!(frame.position.y, 0.0);
    }

    #[test]
    fn test_unbound_callbacks_are_dropped() {
        let mut world = PhysicsWorld::default();
        let mut registry = BodyRegistry::new(None);
        let id = ball(&mut world, &mut registry, Vec2::ZERO);

        let mut funcs = IntegrationFuncs::new();
        funcs.set_velocity(id, Box::new(|_: &mut VelocityUpdate| {}), 1.0);
        funcs.set_position(id, Box::new(|_: &mut PositionUpdate| {}));
        let replaced = funcs.set_velocity(id, Box::new(|_: &mut VelocityUpdate| {}), 0.3);
        assert_eq!(replaced, Some(1.0));

        registry.detach(&mut world, id).unwrap();
        funcs.retain_bound(&registry);
        assert!(funcs.is_empty());
    }
}
