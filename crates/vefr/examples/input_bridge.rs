//! Input bridge — an external producer feeding the store at tick boundaries.
//!
//! A producer thread stands in for a device back end, pushing samples into a
//! single-producer queue. The input system drains the queue in its `update`
//! and writes the latest state into the player singleton's components; the
//! rest of the simulation only ever sees input that is stable for the whole
//! tick. Lifecycle hooks attach and detach the `InputActive` tag, so other
//! systems can tell whether the bridge is live.
//!
//! Run with: `cargo run -p vefr --example input_bridge`

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use vefr::prelude::*;

// ── Components ───────────────────────────────────────────────────────────

/// Singleton tag for the player entity.
struct PlayerTag;

/// Present while the input bridge is running.
struct InputActive;

#[derive(Debug, Clone, Copy, Default)]
struct MoveInput {
    x: f32,
    y: f32,
}

struct Firing(bool);

// ── Wire format from the producer thread ─────────────────────────────────

enum InputEvent {
    Move { x: f32, y: f32 },
    Jump,
}

/// The receiving end of the input queue, parked in the world as a resource.
struct InputQueue(Mutex<Receiver<InputEvent>>);

// ── The bridge system ────────────────────────────────────────────────────

struct InputSystem;

impl System for InputSystem {
    fn name(&self) -> &str {
        "input"
    }

    fn access(&self) -> Access {
        Access::new().write::<MoveInput>().write::<Firing>()
    }

    fn on_start(&mut self, world: &mut World) {
        let player = world.singleton::<PlayerTag>().expect("one player exists");
        world.insert(player, InputActive).expect("player is alive");
        log::info!("input bridge started");
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let world = ctx.world();
        let Ok(player) = world.singleton::<PlayerTag>() else {
            return;
        };

        // Drain everything the producer pushed since the last tick; the
        // last movement sample wins, jumps latch until observed.
        let queue = world.resource::<InputQueue>().0.lock().expect("queue lock");
        while let Ok(event) = queue.try_recv() {
            match event {
                InputEvent::Move { x, y } => {
                    world.set(player, MoveInput { x, y }).expect("player has input");
                }
                InputEvent::Jump => {
                    world.set(player, Firing(true)).expect("player has input");
                }
            }
        }
    }

    fn on_stop(&mut self, world: &mut World) {
        if let Ok(player) = world.singleton::<PlayerTag>() {
            let _ = world.remove::<InputActive>(player);
        }
        log::info!("input bridge stopped");
    }
}

/// Consumes the latched state downstream of the bridge.
struct MovementSystem;

impl System for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn access(&self) -> Access {
        Access::new().read::<MoveInput>().write::<Firing>()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let world = ctx.world();
        let Ok(player) = world.singleton::<PlayerTag>() else {
            return;
        };
        let input = *world.get::<MoveInput>(player).expect("player has input");
        if input.x != 0.0 || input.y != 0.0 {
            log::debug!("moving ({:.2}, {:.2})", input.x, input.y);
        }
        let mut firing = world.get_mut::<Firing>(player).expect("player has input");
        if firing.0 {
            log::info!("fire!");
            firing.0 = false;
        }
    }
}

fn main() {
    vefr::diag::init_logger();

    let (sender, receiver): (Sender<InputEvent>, Receiver<InputEvent>) = mpsc::channel();

    // The stand-in device thread.
    let producer = std::thread::spawn(move || {
        for step in 0..30 {
            let _ = sender.send(InputEvent::Move {
                x: (step as f32 * 0.1).sin(),
                y: 1.0,
            });
            if step % 10 == 0 {
                let _ = sender.send(InputEvent::Jump);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    let mut runtime = Runtime::new()
        .insert_resource(InputQueue(Mutex::new(receiver)))
        .setup(|world| {
            world.spawn((PlayerTag, MoveInput::default(), Firing(false)));
        })
        .add_system(InputSystem)
        .add_system_with(
            MovementSystem,
            SystemConfig::new().after_system("input"),
        )
        .build()
        .expect("valid system ordering");

    for _ in 0..40 {
        runtime.tick().expect("tick");
        std::thread::sleep(Duration::from_millis(5));
    }
    runtime.shutdown();

    producer.join().expect("producer thread");
    let world = runtime.world();
    let player = world.singleton::<PlayerTag>().expect("player survives");
    assert!(!world.contains::<InputActive>(player));
    println!("bridge detached cleanly after {} ticks", runtime.ticks());
}
