//! Gravity field — parallel jobs over a falling body population.
//!
//! Emitter entities carry a gravity factor; every dynamic body picks up the
//! strongest emitter's factor, then integrates velocity under scaled
//! gravity. Both passes run as jobs: the factor pass writes bodies while
//! reading an emitter snapshot, the integration pass runs after it through
//! hazard tracking alone.
//!
//! Run with: `cargo run -p vefr --example gravity`

use vefr::prelude::*;

const GRAVITY: f32 = -9.81;
const DT: f32 = 1.0 / 60.0;

// ── Components ───────────────────────────────────────────────────────────

/// Marks an entity as a field emitter.
struct Emitter {
    factor: f32,
    damping: f32,
}

struct Velocity {
    y: f32,
}

struct GravityFactor(f32);

// ── Systems ──────────────────────────────────────────────────────────────

/// Applies the strongest emitter's factor and damping to every body.
struct FieldSystem;

impl System for FieldSystem {
    fn name(&self) -> &str {
        "field"
    }

    fn access(&self) -> Access {
        Access::new()
            .read::<Emitter>()
            .write::<GravityFactor>()
            .write::<Velocity>()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        // Snapshot the emitters up front; the job only touches body columns.
        let mut strongest: Option<(f32, f32)> = None;
        ctx.world().for_each::<(&Emitter,)>(|_, (emitter,)| {
            if strongest.map(|(f, _)| emitter.factor > f).unwrap_or(true) {
                strongest = Some((emitter.factor, emitter.damping));
            }
        });
        let Some((factor, damping)) = strongest else {
            return;
        };

        let bodies = Query::new().write::<GravityFactor>().write::<Velocity>();
        ctx.schedule_parallel(&bodies, DEFAULT_BATCH, move |batch| {
            for row in 0..batch.len() {
                batch.get_mut::<GravityFactor>(row)?.0 = factor;
                batch.get_mut::<Velocity>(row)?.y *= damping;
            }
            Ok(())
        });
    }
}

/// Integrates velocity under the per-body gravity factor.
struct IntegrateSystem;

impl System for IntegrateSystem {
    fn name(&self) -> &str {
        "integrate"
    }

    fn access(&self) -> Access {
        Access::new().read::<GravityFactor>().write::<Velocity>()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let query = Query::new().read::<GravityFactor>().write::<Velocity>();
        ctx.schedule_parallel(&query, DEFAULT_BATCH, |batch| {
            for row in 0..batch.len() {
                let factor = batch.get::<GravityFactor>(row)?.0;
                batch.get_mut::<Velocity>(row)?.y += GRAVITY * factor * DT;
            }
            Ok(())
        });
    }
}

fn main() {
    vefr::diag::init_logger();

    let mut runtime = Runtime::new()
        .setup(|world| {
            world.spawn((Emitter {
                factor: 2.0,
                damping: 0.98,
            },));
            world.spawn((Emitter {
                factor: 0.5,
                damping: 1.0,
            },));
            for _ in 0..1024 {
                world.spawn((Velocity { y: 0.0 }, GravityFactor(1.0)));
            }
        })
        .add_system(FieldSystem)
        .add_system_with(
            IntegrateSystem,
            SystemConfig::new().after_system("field"),
        )
        .build()
        .expect("valid system ordering");

    for _ in 0..120 {
        runtime.tick().expect("tick");
    }

    // Report the terminal velocity of one body.
    let world = runtime.world();
    let sample = world
        .snapshot(&Query::new().read::<Velocity>().without::<Emitter>())
        .into_iter()
        .next()
        .expect("bodies exist");
    let velocity = world.get::<Velocity>(sample).expect("alive");
    println!(
        "after {} ticks: sample body velocity {:.2} m/s",
        runtime.ticks(),
        velocity.y
    );
}
