//! Animator bridge — foreign handles tied to component lifetime.
//!
//! A stand-in animation runtime lives outside the store. Each character
//! entity holds an `AnimRef` component: an opaque handle into that runtime.
//! The setup system attaches handles through a command buffer (the pass that
//! discovers missing handles must not mutate structure itself), the
//! animation system pushes movement state across the bridge, and the cleanup
//! system despawns characters whose blueprint is gone. A remove hook
//! releases the foreign rig whenever an `AnimRef` leaves the store, no
//! matter which path removed it.
//!
//! Run with: `cargo run -p vefr --example animator_bridge`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use vefr::prelude::*;

// ── The "external" animation runtime ─────────────────────────────────────

#[derive(Default)]
struct Rig {
    playing: bool,
}

/// What lives outside the store: rigs keyed by handle.
#[derive(Default)]
struct AnimRuntime {
    rigs: Mutex<HashMap<u64, Rig>>,
    next: AtomicU64,
    released: AtomicU64,
}

impl AnimRuntime {
    fn create_rig(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.rigs.lock().unwrap().insert(id, Rig::default());
        id
    }

    fn release_rig(&self, id: u64) {
        if self.rigs.lock().unwrap().remove(&id).is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn set_playing(&self, id: u64, playing: bool) {
        if let Some(rig) = self.rigs.lock().unwrap().get_mut(&id) {
            rig.playing = playing;
        }
    }

    fn live_count(&self) -> usize {
        self.rigs.lock().unwrap().len()
    }
}

// ── Components ───────────────────────────────────────────────────────────

/// Characters spawn from a blueprint; losing it marks them for teardown.
struct Blueprint;

/// Foreign handle into the animation runtime.
struct AnimRef(u64);

struct Movement {
    speed: f32,
}

// ── Systems ──────────────────────────────────────────────────────────────

/// Attaches a rig to every blueprint entity that lacks one.
struct SetupSystem {
    runtime: Arc<AnimRuntime>,
}

impl System for SetupSystem {
    fn name(&self) -> &str {
        "setup"
    }

    fn access(&self) -> Access {
        Access::new().read::<Blueprint>().read::<AnimRef>()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let mut missing = Vec::new();
        ctx.world()
            .for_each_without::<(&Blueprint,), AnimRef>(|entity, _| {
                missing.push(entity);
            });
        for entity in missing {
            let rig = self.runtime.create_rig();
            ctx.commands().record_insert(entity, AnimRef(rig));
        }
    }
}

/// Pushes movement state across the bridge each tick.
struct AnimationSystem {
    runtime: Arc<AnimRuntime>,
}

impl System for AnimationSystem {
    fn name(&self) -> &str {
        "animation"
    }

    fn access(&self) -> Access {
        Access::new().read::<Movement>().read::<AnimRef>()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let runtime = self.runtime.clone();
        ctx.world()
            .for_each::<(&Movement, &AnimRef)>(|_, (movement, anim)| {
                runtime.set_playing(anim.0, movement.speed > 0.0);
            });
    }
}

/// Tears down characters whose blueprint is gone.
struct CleanupSystem;

impl System for CleanupSystem {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn access(&self) -> Access {
        Access::new().read::<AnimRef>()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let mut doomed = Vec::new();
        ctx.world()
            .for_each_without::<(&AnimRef,), Blueprint>(|entity, _| {
                doomed.push(entity);
            });
        for entity in doomed {
            ctx.commands().record_despawn(entity);
        }
    }
}

fn main() {
    vefr::diag::init_logger();

    let anim = Arc::new(AnimRuntime::default());

    let hook_runtime = anim.clone();
    let mut runtime = Runtime::new()
        .setup(move |world| {
            // The foreign side is released exactly when the handle leaves
            // the store, whichever path removes it.
            world.on_remove::<AnimRef>(move |entity, anim_ref| {
                log::info!("releasing rig {} of {entity:?}", anim_ref.0);
                hook_runtime.release_rig(anim_ref.0);
            });
            for i in 0..3 {
                world.spawn((Blueprint, Movement { speed: i as f32 }));
            }
        })
        .add_system(SetupSystem {
            runtime: anim.clone(),
        })
        .add_system_with(
            AnimationSystem {
                runtime: anim.clone(),
            },
            SystemConfig::new().after_system("setup"),
        )
        .add_system_with(CleanupSystem, SystemConfig::new().after_system("animation"))
        .build()
        .expect("valid system ordering");

    runtime.tick().expect("tick");
    assert_eq!(anim.live_count(), 3);

    // Drop one character's blueprint between ticks (the direct structural
    // fast path is legal here: nothing is in flight).
    let world = runtime.world_mut();
    let victim = world
        .snapshot(&Query::new().read::<Blueprint>())
        .into_iter()
        .next()
        .expect("characters exist");
    world.remove::<Blueprint>(victim).expect("alive");

    runtime.tick().expect("tick");

    // Cleanup despawned the orphan and the hook released its rig.
    assert_eq!(anim.live_count(), 2);
    assert_eq!(anim.released.load(Ordering::Relaxed), 1);
    assert!(!runtime.world().is_alive(victim));

    println!(
        "rigs live: {}, released: {}",
        anim.live_count(),
        anim.released.load(Ordering::Relaxed)
    );
}
