use anyhow::Result;
use glam::Vec2;
use log::info;

use kinetic_scene::engine::physics::PinParams;
use kinetic_scene::{
    BodyKind, ConstraintKind, PhysicsSpace, Scene, SpaceConfig, Transform2D, VisualGeometry,
    VisualHost,
};

const FPS: f32 = 60.0;
const SECONDS: f32 = 2.0;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting Kinetic Scene demo...");

    let mut scene = Scene::new();
    let mut space = PhysicsSpace::new(SpaceConfig::default())?;

    let floor = scene.spawn(
        Transform2D::from_position(Vec2::new(0.0, -3.0)),
        VisualGeometry::rectangle(12.0, 0.5),
    );
    let ball = scene.spawn(
        Transform2D::from_position(Vec2::new(-2.0, 2.0)),
        VisualGeometry::circle(0.3),
    );
    let pivot = scene.spawn(
        Transform2D::from_position(Vec2::new(2.0, 2.0)),
        VisualGeometry::circle(0.05),
    );
    let bob = scene.spawn(
        Transform2D::from_position(Vec2::new(3.5, 2.0)),
        VisualGeometry::polygon(vec![
            Vec2::new(-0.2, -0.2),
            Vec2::new(0.2, -0.2),
            Vec2::new(0.2, 0.2),
            Vec2::new(-0.2, 0.2),
        ]),
    );

    space.register_body(&floor, BodyKind::Static)?;
    space.register_body(&ball, BodyKind::Dynamic)?;
    space.register_body(&pivot, BodyKind::Static)?;
    space.register_body(&bob, BodyKind::Dynamic)?;
    space.add_constraint(pivot.id, bob.id, ConstraintKind::Pin(PinParams::default()))?;

    let frames = (FPS * SECONDS) as usize;
    for frame in 0..frames {
        let report = space.step_and_sync(&mut scene, 1.0 / FPS);
        if frame % 30 == 0 || frame + 1 == frames {
            for id in [ball.id, bob.id] {
                if let Some(t) = scene.transform(id) {
                    info!(
                        "frame {:3} {}: position ({:.3}, {:.3}), rotation {:.3}",
                        frame, id, t.position.x, t.position.y, t.rotation
                    );
                }
            }
            info!("frame {:3}: {} bodies written back", frame, report.written_back);
        }
    }

    for constraint in space.constraints() {
        info!("{} glyph: {:?}", constraint.id(), constraint.glyph());
    }

    info!("Demo finished after {} frames", space.scheduler().frame_count());
    Ok(())
}
