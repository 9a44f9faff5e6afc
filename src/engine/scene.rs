// Host-side scene seam: visual object identity, transforms and geometry hand-off

use crate::core::math::Transform2D;
use crate::engine::shapes::VisualGeometry;
use std::collections::HashMap;
use std::fmt;

/// Unique identity of a visual object owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisualId(pub u64);

impl VisualId {
    /// Create a visual ID from a raw u64
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VisualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "visual#{}", self.0)
    }
}

/// What the host hands over when registering an object with the simulation
#[derive(Debug, Clone)]
pub struct VisualObject {
    pub id: VisualId,
    pub transform: Transform2D,
    /// Geometry in the object's local frame (origin at `transform.position`, unrotated)
    pub geometry: VisualGeometry,
}

impl VisualObject {
    pub fn new(id: VisualId, transform: Transform2D, geometry: VisualGeometry) -> Self {
        Self {
            id,
            transform,
            geometry,
        }
    }
}

/// The scene graph the simulation writes transforms back into.
///
/// Implemented by the animation host; [`Scene`] is a minimal in-memory version.
pub trait VisualHost {
    /// Current transform of a visual object, `None` if the host no longer has it
    fn transform(&self, id: VisualId) -> Option<Transform2D>;

    /// Overwrite the transform of a visual object
    fn set_transform(&mut self, id: VisualId, transform: Transform2D);
}

/// HashMap-backed scene used by headless hosts and tests
#[derive(Debug, Default)]
pub struct Scene {
    transforms: HashMap<VisualId, Transform2D>,
    next_id: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a visual object and return it ready for registration
    pub fn spawn(&mut self, transform: Transform2D, geometry: VisualGeometry) -> VisualObject {
        let id = VisualId(self.next_id);
        self.next_id += 1;
        self.transforms.insert(id, transform);
        VisualObject::new(id, transform, geometry)
    }

    /// Remove a visual object from the scene
    pub fn despawn(&mut self, id: VisualId) -> Option<Transform2D> {
        self.transforms.remove(&id)
    }

    /// Move an object as the host's own animation would
    pub fn move_to(&mut self, id: VisualId, transform: Transform2D) {
        if let Some(t) = self.transforms.get_mut(&id) {
            *t = transform;
        }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl VisualHost for Scene {
    fn transform(&self, id: VisualId) -> Option<Transform2D> {
        self.transforms.get(&id).copied()
    }

    fn set_transform(&mut self, id: VisualId, transform: Transform2D) {
        self.transforms.insert(id, transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn test_spawn_assigns_unique_ids() {
        let mut scene = Scene::new();
        let geometry = VisualGeometry::circle(0.5);
        let a = scene.spawn(Transform2D::default(), geometry.clone());
        let b = scene.spawn(Transform2D::default(), geometry);

        assert_ne!(a.id, b.id);
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn test_move_and_despawn() {
        let mut scene = Scene::new();
        let obj = scene.spawn(Transform2D::default(), VisualGeometry::circle(1.0));
        let target = Transform2D::from_position(Vec2::new(2.0, 3.0));

        scene.move_to(obj.id, target);
        assert_eq!(scene.transform(obj.id), Some(target));

        assert_eq!(scene.despawn(obj.id), Some(target));
        assert!(scene.transform(obj.id).is_none());
        assert!(scene.is_empty());
    }

    #[test]
    fn test_visual_id_display() {
        assert_eq!(VisualId::from_u64(7).to_string(), "visual#7");
        assert_eq!(VisualId(7).as_u64(), 7);
    }
}
