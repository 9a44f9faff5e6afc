//! Frame scheduler binding simulation steps to the host's frames
//!
//! Each frame runs a fixed number of substeps of `frame_duration / substeps`,
//! then writes body poses back onto the visual objects. Kinematic bodies run
//! the other way: when the host moved their visual, the body is driven there.

use glam::Vec2;
use rapier2d::prelude::{Real, RigidBodyHandle, Vector};

use crate::core::math::{to_vector, wrap_angle, Transform2D};
use crate::engine::physics::body::BodyKind;
use crate::engine::physics::collision::CollisionPhase;
use crate::engine::physics::space::SimulationState;
use crate::engine::scene::{VisualHost, VisualId};

/// Visual moves smaller than this count as "not moved by the host"
const HOST_MOVE_EPSILON: f32 = 1e-5;

/// Where the scheduler is within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Stepping,
    WritingBack,
}

/// Summary of one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Substeps actually run, 0 for skipped frames
    pub substeps: u32,

    /// Bindings whose transform was written to the host
    pub written_back: usize,

    /// Bindings detached because their body or visual went missing
    pub detached: Vec<VisualId>,

    /// Bodies removed on request of collision handlers
    pub removed: Vec<VisualId>,

    /// Collision handler invocations
    pub dispatched_events: usize,
}

/// Velocity a kinematic body had before the host drove it
struct KinematicOverride {
    handle: RigidBodyHandle,
    linvel: Vector<Real>,
    angvel: Real,
}

/// Drives Idle -> Stepping -> WritingBack -> Idle once per frame
#[derive(Debug)]
pub struct SyncScheduler {
    substeps: u32,
    phase: SyncPhase,
    paused: bool,
    frame_count: u64,
    substep_count: u64,
}

impl SyncScheduler {
    pub fn new(substeps: u32) -> Self {
        Self {
            substeps: substeps.max(1),
            phase: SyncPhase::Idle,
            paused: false,
            frame_count: 0,
            substep_count: 0,
        }
    }

    pub(crate) fn run_frame<H: VisualHost + ?Sized>(
        &mut self,
        state: &mut SimulationState,
        host: &mut H,
        frame_duration: f32,
    ) -> FrameReport {
        let mut report = FrameReport::default();
        if self.paused {
            return report;
        }
        if !frame_duration.is_finite() || frame_duration <= 0.0 {
            log::warn!("Skipping frame with invalid duration {}", frame_duration);
            return report;
        }

        let mut failed = Vec::new();

        self.phase = SyncPhase::Stepping;
        let overrides = drive_kinematic_bodies(state, host, frame_duration, &mut failed);

        let substep = frame_duration / self.substeps as f32;
        state.integrators.retain_bound(&state.registry);
        let solve_handlers = (
            state.dispatcher.handles(CollisionPhase::PreSolve),
            state.dispatcher.handles(CollisionPhase::PostSolve),
        );
        for _ in 0..self.substeps {
            state
                .integrators
                .run_velocity(&mut state.world, &state.registry, substep);
            state.constraints.pre_solve(&mut state.world, substep);
            state.world.contact_overrides().end_substep();
            if solve_handlers.0 {
                report.dispatched_events += dispatch_solve(state, CollisionPhase::PreSolve);
            }

            state.world.step(substep);

            let events = state.world.drain_collision_events();
            if !events.is_empty() {
                let registry = &state.registry;
                report.dispatched_events += state.dispatcher.dispatch(
                    &events,
                    |shape| registry.owner_of(shape),
                    &mut state.commands,
                    state.world.contact_overrides(),
                );
            }
            if solve_handlers.1 {
                report.dispatched_events += dispatch_solve(state, CollisionPhase::PostSolve);
            }
            state
                .integrators
                .run_position(&mut state.world, &state.registry, substep);
        }
        state.world.reset_forces();
        for o in overrides {
            if let Some(body) = state.world.get_rigid_body_mut(o.handle) {
                body.set_linvel(o.linvel, false);
                body.set_angvel(o.angvel, false);
            }
        }
        report.substeps = self.substeps;

        self.phase = SyncPhase::WritingBack;
        report.written_back = write_back(state, host, &mut failed);

        failed.sort();
        failed.dedup();
        for id in failed {
            state.constraints.remove_for_body(&mut state.world, id);
            match state.registry.detach(&mut state.world, id) {
                Ok(_) => log::error!("Detached {}: its body or visual object is gone", id),
                Err(e) => log::error!("Failed to detach {}: {}", id, e),
            }
            report.detached.push(id);
        }

        state.constraints.refresh_glyphs(&state.world);
        report.removed = apply_commands(state);

        self.phase = SyncPhase::Idle;
        self.frame_count += 1;
        self.substep_count += self.substeps as u64;
        log::debug!(
            "Frame {}: {} substeps, {} written back, {} handler calls",
            self.frame_count,
            report.substeps,
            report.written_back,
            report.dispatched_events
        );
        report
    }

    pub fn substeps(&self) -> u32 {
        self.substeps
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Frames completed since creation
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Substeps run since creation
    pub fn substep_count(&self) -> u64 {
        self.substep_count
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause the simulation; paused frames neither step nor write back
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            log::info!("Simulation paused");
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            log::info!("Simulation resumed");
        }
    }

    pub fn toggle_pause(&mut self) {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new(crate::engine::physics::config::DEFAULT_SUBSTEPS)
    }
}

/// Give kinematic bodies moved by the host the velocity that reaches the new pose this frame
fn drive_kinematic_bodies<H: VisualHost + ?Sized>(
    state: &mut SimulationState,
    host: &H,
    frame_duration: f32,
    failed: &mut Vec<VisualId>,
) -> Vec<KinematicOverride> {
    let mut overrides = Vec::new();
    for binding in state.registry.iter() {
        if binding.kind() != BodyKind::Kinematic {
            continue;
        }
        let id = binding.visual_id();
        let Some(target) = host.transform(id) else {
            failed.push(id);
            continue;
        };
        if target.approx_eq(&binding.last_synced, HOST_MOVE_EPSILON) {
            continue;
        }
        let Some(body) = state.world.get_rigid_body_mut(binding.body()) else {
            failed.push(id);
            continue;
        };

        let current = binding.frame(body);
        let linvel: Vec2 = (target.position - current.position) / frame_duration;
        let angvel = wrap_angle(target.rotation - current.rotation) / frame_duration;
        overrides.push(KinematicOverride {
            handle: binding.body(),
            linvel: *body.linvel(),
            angvel: body.angvel(),
        });
        log::debug!(
            "Driving kinematic {} to its host pose with velocity ({}, {})",
            id,
            linvel.x,
            linvel.y
        );
        body.set_linvel(to_vector(linvel), true);
        body.set_angvel(angvel, true);
    }
    overrides
}

/// Run pre- or post-solve handlers over the pairs touching right now
fn dispatch_solve(state: &mut SimulationState, phase: CollisionPhase) -> usize {
    let pairs = state.world.touching_pairs();
    if pairs.is_empty() {
        return 0;
    }
    let registry = &state.registry;
    state.dispatcher.dispatch_solve(
        phase,
        &pairs,
        |shape| registry.owner_of(shape),
        &mut state.commands,
        state.world.contact_overrides(),
    )
}

/// Copy body poses onto visuals; returns how many were written
fn write_back<H: VisualHost + ?Sized>(
    state: &mut SimulationState,
    host: &mut H,
    failed: &mut Vec<VisualId>,
) -> usize {
    let mut synced: Vec<(VisualId, Transform2D)> = Vec::new();
    for binding in state.registry.iter() {
        if !binding.kind().is_synced() {
            continue;
        }
        let id = binding.visual_id();
        let Some(body) = state.world.get_rigid_body(binding.body()) else {
            failed.push(id);
            continue;
        };
        if host.transform(id).is_none() {
            failed.push(id);
            continue;
        }
        let frame = binding.frame(body);
        if !frame.position.is_finite() || !frame.rotation.is_finite() {
            log::error!("{} has a non-finite pose {:?}", id, frame);
            failed.push(id);
            continue;
        }
        host.set_transform(id, frame);
        synced.push((id, frame));
    }

    for (id, frame) in &synced {
        if let Ok(binding) = state.registry.get_mut(*id) {
            binding.last_synced = *frame;
        }
    }
    synced.len()
}

/// Apply removals queued by collision handlers
fn apply_commands(state: &mut SimulationState) -> Vec<VisualId> {
    if state.commands.is_empty() {
        return Vec::new();
    }
    let (removals, constraint_removals) = state.commands.take();

    for id in constraint_removals {
        if state.constraints.remove(&mut state.world, id).is_err() {
            log::debug!("Deferred removal of {} skipped: already gone", id);
        }
    }

    let mut removed = Vec::new();
    for id in removals {
        if !state.registry.contains(id) {
            log::debug!("Deferred removal of {} skipped: not bound", id);
            continue;
        }
        state.constraints.remove_for_body(&mut state.world, id);
        if state.registry.detach(&mut state.world, id).is_ok() {
            removed.push(id);
        }
    }
    log::debug!("Applied {} deferred body removal(s)", removed.len());
    removed
}
