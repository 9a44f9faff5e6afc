// Engine modules: scene seam, shape synthesis, physics, frame sync

pub mod physics;
pub mod scene;
pub mod shapes;
pub mod sync;
