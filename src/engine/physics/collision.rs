use glam::Vec2;
use rapier2d::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::constraint::ConstraintId;
use crate::core::math::to_vector;
use crate::engine::scene::VisualId;

/// Group, category and mask triple deciding which shapes may touch
///
/// Two shapes collide iff their groups differ (or either group is 0) and each
/// one's categories intersect the other's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionFilter {
    /// Shapes sharing a non-zero group never collide
    pub group: u32,

    /// Category bits this shape belongs to
    pub categories: u32,

    /// Category bits this shape collides with
    pub mask: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            group: 0,
            categories: u32::MAX,
            mask: u32::MAX,
        }
    }
}

impl CollisionFilter {
    pub fn new(group: u32, categories: u32, mask: u32) -> Self {
        Self {
            group,
            categories,
            mask,
        }
    }

    /// Evaluate the pairwise collision rule
    pub fn can_collide(&self, other: &CollisionFilter) -> bool {
        let groups_allow = self.group == 0 || self.group != other.group;
        groups_allow && (self.categories & other.mask) != 0 && (other.categories & self.mask) != 0
    }

    /// Category/mask half of the rule, evaluated by rapier's broad phase
    pub fn to_interaction_groups(self) -> InteractionGroups {
        InteractionGroups::new(
            Group::from_bits_truncate(self.categories),
            Group::from_bits_truncate(self.mask),
        )
    }

    /// Group half of the rule travels in the collider's user data
    pub fn user_data(self) -> u128 {
        self.group as u128
    }
}

fn group_of(collider: &Collider) -> u32 {
    (collider.user_data & u32::MAX as u128) as u32
}

/// How long the solver skips a pair's contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IgnoreSpan {
    /// Rejected by a begin handler
    UntilSeparate,
    /// Rejected by a pre-solve handler
    Substep,
}

fn pair_of(c1: ColliderHandle, c2: ColliderHandle) -> (ColliderHandle, ColliderHandle) {
    if c1.0 <= c2.0 {
        (c1, c2)
    } else {
        (c2, c1)
    }
}

#[derive(Debug, Default)]
struct OverrideTable {
    ignored: HashMap<(ColliderHandle, ColliderHandle), IgnoreSpan>,
    surface_velocity: HashMap<ColliderHandle, Vec2>,
}

/// Contact state shared between collision handlers and the solver hooks.
///
/// Handlers run between substeps; the hooks read the table while rapier steps.
#[derive(Debug, Clone, Default)]
pub struct ContactOverrides {
    table: Arc<Mutex<OverrideTable>>,
}

impl ContactOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R: Default>(&self, f: impl FnOnce(&mut OverrideTable) -> R) -> R {
        self.table
            .lock()
            .map(|mut table| f(&mut table))
            .unwrap_or_default()
    }

    /// Skip the pair's contacts until the shapes separate
    pub fn ignore_until_separate(&self, c1: ColliderHandle, c2: ColliderHandle) {
        self.with(|t| t.ignored.insert(pair_of(c1, c2), IgnoreSpan::UntilSeparate));
    }

    /// Skip the pair's contacts for the coming substep only
    pub fn ignore_substep(&self, c1: ColliderHandle, c2: ColliderHandle) {
        self.with(|t| {
            t.ignored.entry(pair_of(c1, c2)).or_insert(IgnoreSpan::Substep);
        });
    }

    /// Solve the pair's contacts again
    pub fn release(&self, c1: ColliderHandle, c2: ColliderHandle) {
        self.with(|t| t.ignored.remove(&pair_of(c1, c2)));
    }

    /// Drop every per-substep rejection
    pub fn end_substep(&self) {
        self.with(|t| t.ignored.retain(|_, span| *span == IgnoreSpan::UntilSeparate));
    }

    pub fn is_ignored(&self, c1: ColliderHandle, c2: ColliderHandle) -> bool {
        self.with(|t| t.ignored.contains_key(&pair_of(c1, c2)))
    }

    /// Rejected by a begin handler and not yet separated
    pub fn is_rejected(&self, c1: ColliderHandle, c2: ColliderHandle) -> bool {
        self.with(|t| t.ignored.get(&pair_of(c1, c2)) == Some(&IgnoreSpan::UntilSeparate))
    }

    /// World-space velocity of a shape's surface, used by friction only
    pub fn set_surface_velocity(&self, collider: ColliderHandle, velocity: Vec2) {
        self.with(|t| {
            if velocity == Vec2::ZERO {
                t.surface_velocity.remove(&collider);
            } else {
                t.surface_velocity.insert(collider, velocity);
            }
        });
    }

    pub fn surface_velocity(&self, collider: ColliderHandle) -> Vec2 {
        self.with(|t| t.surface_velocity.get(&collider).copied().unwrap_or(Vec2::ZERO))
    }

    /// Forget everything recorded about a removed collider
    pub fn forget_collider(&self, collider: ColliderHandle) {
        self.with(|t| {
            t.surface_velocity.remove(&collider);
            t.ignored.retain(|(c1, c2), _| *c1 != collider && *c2 != collider);
        });
    }
}

/// Solver hooks: the group half of the collision filters, rejected contacts
/// and surface velocities
pub struct SpaceHooks {
    overrides: ContactOverrides,
}

impl SpaceHooks {
    pub fn new(overrides: ContactOverrides) -> Self {
        Self { overrides }
    }

    fn allows(context: &PairFilterContext) -> bool {
        let (Some(c1), Some(c2)) = (
            context.colliders.get(context.collider1),
            context.colliders.get(context.collider2),
        ) else {
            return true;
        };
        let (g1, g2) = (group_of(c1), group_of(c2));
        g1 == 0 || g1 != g2
    }
}

impl PhysicsHooks for SpaceHooks {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        if !Self::allows(context) {
            return None;
        }
        // Ignored pairs keep their contacts (and events) but get no impulses
        if self.overrides.is_ignored(context.collider1, context.collider2) {
            Some(SolverFlags::empty())
        } else {
            Some(SolverFlags::COMPUTE_IMPULSES)
        }
    }

    fn filter_intersection_pair(&self, context: &PairFilterContext) -> bool {
        Self::allows(context)
    }

    fn modify_solver_contacts(&self, context: &mut ContactModificationContext) {
        let relative = self.overrides.surface_velocity(context.collider1)
            - self.overrides.surface_velocity(context.collider2);
        if relative == Vec2::ZERO {
            return;
        }
        let tangent_velocity = to_vector(relative);
        for contact in context.solver_contacts.iter_mut() {
            contact.tangent_velocity = tangent_velocity;
        }
    }
}

/// Collision event captured during a physics step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionEvent {
    /// Two colliders started touching
    Started {
        collider1: ColliderHandle,
        collider2: ColliderHandle,
        sensor: bool,
    },

    /// Two colliders stopped touching
    Stopped {
        collider1: ColliderHandle,
        collider2: ColliderHandle,
        sensor: bool,
    },
}

impl CollisionEvent {
    pub fn colliders(&self) -> (ColliderHandle, ColliderHandle) {
        match *self {
            CollisionEvent::Started {
                collider1,
                collider2,
                ..
            }
            | CollisionEvent::Stopped {
                collider1,
                collider2,
                ..
            } => (collider1, collider2),
        }
    }

    pub fn phase(&self) -> CollisionPhase {
        match self {
            CollisionEvent::Started { .. } => CollisionPhase::Begin,
            CollisionEvent::Stopped { .. } => CollisionPhase::Separate,
        }
    }

    pub fn is_sensor(&self) -> bool {
        match *self {
            CollisionEvent::Started { sensor, .. } | CollisionEvent::Stopped { sensor, .. } => {
                sensor
            }
        }
    }
}

/// Queue for storing collision events during physics step
pub struct CollisionEventQueue {
    events: Arc<Mutex<Vec<CollisionEvent>>>,
}

impl CollisionEventQueue {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::with_capacity(32))),
        }
    }

    /// Take every queued event, leaving the queue empty
    pub fn drain(&self) -> Vec<CollisionEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().map(|e| e.is_empty()).unwrap_or(true)
    }

    fn push(&self, event: CollisionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Default for CollisionEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CollisionEventQueue {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: rapier2d::prelude::CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        match event {
            rapier2d::prelude::CollisionEvent::Started(h1, h2, flags) => {
                self.push(CollisionEvent::Started {
                    collider1: h1,
                    collider2: h2,
                    sensor: flags.contains(CollisionEventFlags::SENSOR),
                });
            }
            rapier2d::prelude::CollisionEvent::Stopped(h1, h2, flags) => {
                self.push(CollisionEvent::Stopped {
                    collider1: h1,
                    collider2: h2,
                    sensor: flags.contains(CollisionEventFlags::SENSOR),
                });
            }
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Which part of a contact's lifetime a handler is called for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionPhase {
    /// Shapes started touching during the last substep
    Begin,

    /// Shapes are touching and about to be solved in the coming substep
    PreSolve,

    /// Shapes are touching and were solved in the last substep
    PostSolve,

    /// Shapes stopped touching during the last substep
    Separate,
}

/// Mutations requested from inside collision handlers.
///
/// Applied at the frame boundary, after write-back.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Commands {
    removals: Vec<VisualId>,
    constraint_removals: Vec<ConstraintId>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a body (and its shapes and constraints) for removal
    pub fn remove_body(&mut self, id: VisualId) {
        if !self.removals.contains(&id) {
            self.removals.push(id);
        }
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) {
        if !self.constraint_removals.contains(&id) {
            self.constraint_removals.push(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.constraint_removals.is_empty()
    }

    pub(crate) fn take(&mut self) -> (Vec<VisualId>, Vec<ConstraintId>) {
        (
            std::mem::take(&mut self.removals),
            std::mem::take(&mut self.constraint_removals),
        )
    }
}

/// What a collision handler sees
pub struct CollisionContext<'a> {
    pub phase: CollisionPhase,

    /// Owner of the first shape, whose collision type is `type_a`
    pub a: VisualId,
    pub b: VisualId,
    pub type_a: u32,
    pub type_b: u32,

    /// At least one of the shapes is a sensor
    pub sensor: bool,

    /// Sum of the normal impulses applied in the last substep (post-solve only)
    pub total_impulse: f32,

    commands: &'a mut Commands,
}

impl<'a> CollisionContext<'a> {
    pub fn commands(&mut self) -> &mut Commands {
        self.commands
    }

    /// Shorthand for scheduling a body removal
    pub fn remove_body(&mut self, id: VisualId) {
        self.commands.remove_body(id);
    }
}

/// Begin and pre-solve callback; returning `false` tells the solver to ignore the contact
pub type ContactFilter = Box<dyn FnMut(&mut CollisionContext<'_>) -> bool>;

/// Post-solve and separate callback
pub type CollisionCallback = Box<dyn FnMut(&mut CollisionContext<'_>)>;

/// Callbacks for one pair of collision types.
///
/// State a handler needs travels in its closures.
#[derive(Default)]
pub struct CollisionHandler {
    begin: Option<ContactFilter>,
    pre_solve: Option<ContactFilter>,
    post_solve: Option<CollisionCallback>,
    separate: Option<CollisionCallback>,
}

impl CollisionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once when shapes start touching. Returning `false` ignores the
    /// contact until they separate; pre- and post-solve are skipped meanwhile.
    pub fn on_begin(
        mut self,
        callback: impl FnMut(&mut CollisionContext<'_>) -> bool + 'static,
    ) -> Self {
        self.begin = Some(Box::new(callback));
        self
    }

    /// Called before every substep while shapes touch. Returning `false`
    /// ignores the contact for that substep.
    pub fn on_pre_solve(
        mut self,
        callback: impl FnMut(&mut CollisionContext<'_>) -> bool + 'static,
    ) -> Self {
        self.pre_solve = Some(Box::new(callback));
        self
    }

    /// Called after every substep in which the contact was solved
    pub fn on_post_solve(
        mut self,
        callback: impl FnMut(&mut CollisionContext<'_>) + 'static,
    ) -> Self {
        self.post_solve = Some(Box::new(callback));
        self
    }

    pub fn on_separate(
        mut self,
        callback: impl FnMut(&mut CollisionContext<'_>) + 'static,
    ) -> Self {
        self.separate = Some(Box::new(callback));
        self
    }

    pub fn handles(&self, phase: CollisionPhase) -> bool {
        match phase {
            CollisionPhase::Begin => self.begin.is_some(),
            CollisionPhase::PreSolve => self.pre_solve.is_some(),
            CollisionPhase::PostSolve => self.post_solve.is_some(),
            CollisionPhase::Separate => self.separate.is_some(),
        }
    }

    /// Run the callback for `context.phase`; `None` when there is none
    fn call(&mut self, context: &mut CollisionContext<'_>) -> Option<bool> {
        match context.phase {
            CollisionPhase::Begin => self.begin.as_mut().map(|f| f(context)),
            CollisionPhase::PreSolve => self.pre_solve.as_mut().map(|f| f(context)),
            CollisionPhase::PostSolve => self.post_solve.as_mut().map(|f| {
                f(context);
                true
            }),
            CollisionPhase::Separate => self.separate.as_mut().map(|f| {
                f(context);
                true
            }),
        }
    }
}

struct HandlerSet {
    type_a: u32,
    handler: CollisionHandler,
}

/// One side of a resolved event: owning visual and its collision type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeOwner {
    pub visual: VisualId,
    pub collision_type: u32,
}

/// Two shapes with active contacts after a substep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchingPair {
    pub collider1: ColliderHandle,
    pub collider2: ColliderHandle,
    /// Sum of the contact impulse magnitudes of the last substep
    pub impulse: f32,
}

fn pair_key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

/// One handler invocation, before it is matched to a registered handler
struct Invocation {
    phase: CollisionPhase,
    sensor: bool,
    total_impulse: f32,
}

/// Routes physics collision events to handlers keyed by collision type pairs
#[derive(Default)]
pub struct CollisionDispatcher {
    pairs: HashMap<(u32, u32), HandlerSet>,
    wildcards: HashMap<u32, CollisionHandler>,
}

impl CollisionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register handlers for an unordered pair, replacing any existing ones
    pub fn register_handler(&mut self, type_a: u32, type_b: u32, handler: CollisionHandler) {
        let replaced = self
            .pairs
            .insert(pair_key(type_a, type_b), HandlerSet { type_a, handler })
            .is_some();
        log::debug!(
            "Collision handler for types ({}, {}) {}",
            type_a,
            type_b,
            if replaced { "replaced" } else { "registered" }
        );
    }

    /// Handlers for `collision_type` against anything without a pair handler
    pub fn register_wildcard_handler(&mut self, collision_type: u32, handler: CollisionHandler) {
        self.wildcards.insert(collision_type, handler);
    }

    pub fn has_handler(&self, type_a: u32, type_b: u32) -> bool {
        self.pairs.contains_key(&pair_key(type_a, type_b))
    }

    /// Whether any registered handler has a callback for `phase`
    pub fn handles(&self, phase: CollisionPhase) -> bool {
        self.pairs.values().any(|set| set.handler.handles(phase))
            || self.wildcards.values().any(|h| h.handles(phase))
    }

    /// Forward begin/separate events to handlers, resolving colliders to their owners.
    ///
    /// A begin handler returning `false` marks the pair ignored until it separates.
    /// Events whose colliders no longer resolve are logged and dropped.
    /// Returns the number of handler invocations.
    pub fn dispatch(
        &mut self,
        events: &[CollisionEvent],
        resolve: impl Fn(ColliderHandle) -> Option<ShapeOwner>,
        commands: &mut Commands,
        overrides: &ContactOverrides,
    ) -> usize {
        let mut invoked = 0;
        for event in events {
            let (h1, h2) = event.colliders();
            if event.phase() == CollisionPhase::Separate {
                overrides.release(h1, h2);
            }
            let (Some(o1), Some(o2)) = (resolve(h1), resolve(h2)) else {
                log::warn!(
                    "Dropping {:?} event between {:?} and {:?}: shape no longer registered",
                    event.phase(),
                    h1,
                    h2
                );
                continue;
            };
            let invocation = Invocation {
                phase: event.phase(),
                sensor: event.is_sensor(),
                total_impulse: 0.0,
            };
            let (count, keep) = self.invoke(&invocation, o1, o2, commands);
            invoked += count;
            if !keep && invocation.phase == CollisionPhase::Begin {
                log::debug!(
                    "Contact between {} and {} ignored until separation",
                    o1.visual,
                    o2.visual
                );
                overrides.ignore_until_separate(h1, h2);
            }
        }
        invoked
    }

    /// Run pre- or post-solve handlers over the currently touching pairs.
    ///
    /// Pairs ignored by a begin handler are skipped. A pre-solve handler
    /// returning `false` ignores the pair for the coming substep.
    pub fn dispatch_solve(
        &mut self,
        phase: CollisionPhase,
        pairs: &[TouchingPair],
        resolve: impl Fn(ColliderHandle) -> Option<ShapeOwner>,
        commands: &mut Commands,
        overrides: &ContactOverrides,
    ) -> usize {
        let mut invoked = 0;
        for pair in pairs {
            if overrides.is_ignored(pair.collider1, pair.collider2) {
                continue;
            }
            let (Some(o1), Some(o2)) = (resolve(pair.collider1), resolve(pair.collider2)) else {
                continue;
            };
            let invocation = Invocation {
                phase,
                sensor: false,
                total_impulse: pair.impulse,
            };
            let (count, keep) = self.invoke(&invocation, o1, o2, commands);
            invoked += count;
            if !keep && phase == CollisionPhase::PreSolve {
                overrides.ignore_substep(pair.collider1, pair.collider2);
            }
        }
        invoked
    }

    /// Call the pair handler, or else the wildcard handlers of both sides.
    ///
    /// Returns the invocation count and whether every callback kept the contact.
    fn invoke(
        &mut self,
        invocation: &Invocation,
        o1: ShapeOwner,
        o2: ShapeOwner,
        commands: &mut Commands,
    ) -> (usize, bool) {
        if let Some(set) = self.pairs.get_mut(&pair_key(o1.collision_type, o2.collision_type)) {
            let (first, second) = if o1.collision_type == set.type_a {
                (o1, o2)
            } else {
                (o2, o1)
            };
            let mut context = invocation.context(first, second, &mut *commands);
            return match set.handler.call(&mut context) {
                Some(keep) => (1, keep),
                None => (0, true),
            };
        }

        let mut invoked = 0;
        let mut keep = true;
        let sides = if o1.collision_type == o2.collision_type {
            vec![(o1, o2)]
        } else {
            vec![(o1, o2), (o2, o1)]
        };
        for (first, second) in sides {
            let Some(handler) = self.wildcards.get_mut(&first.collision_type) else {
                continue;
            };
            let mut context = invocation.context(first, second, &mut *commands);
            if let Some(kept) = handler.call(&mut context) {
                invoked += 1;
                keep &= kept;
            }
        }
        (invoked, keep)
    }
}

impl Invocation {
    fn context<'a>(
        &self,
        first: ShapeOwner,
        second: ShapeOwner,
        commands: &'a mut Commands,
    ) -> CollisionContext<'a> {
        CollisionContext {
            phase: self.phase,
            a: first.visual,
            b: second.visual,
            type_a: first.collision_type,
            type_b: second.collision_type,
            sensor: self.sensor,
            total_impulse: self.total_impulse,
            commands,
        }
    }
}
