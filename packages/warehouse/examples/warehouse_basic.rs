//! Basic usage example for the warehouse allocator.
//!
//! Drives a `MemorySupervisor` the way a tick-based scheduler would: allocation during
//! "active" ticks, maintenance during "idle" ticks.

use warehouse::{MemorySupervisor, Result};

#[derive(Debug, Default)]
struct Particle {
    x: f64,
    y: f64,
    velocity: f64,
}

fn main() -> Result<()> {
    // The supervisor is inert until first use; registration only records intent.
    let mut supervisor = MemorySupervisor::builder()
        .total_memory(256 * 1024 * 1024)
        .os_reserve_mib(64)
        .bay_capacity(128)
        .register::<Particle>(Particle::default)
        .build();

    println!("initialized before first use: {}", supervisor.is_initialized());

    // Lazy ignition: the first active tick reserves the budget.
    supervisor.initialize()?;

    let budget = supervisor.budget().expect("supervisor was just initialized");
    println!(
        "budget: {} bytes total, {} bytes remaining",
        budget.total_bytes(),
        budget.remaining_bytes()
    );

    // A few active ticks: hand out slots and mutate the objects in place.
    let mut particles = Vec::new();
    for i in 0..200 {
        let handle = supervisor.allocate::<Particle>()?;

        let particle = supervisor.get_mut(handle)?;
        particle.x = f64::from(i);
        particle.velocity = 1.5;

        particles.push(handle);
    }

    println!("allocated {} particles", particles.len());

    // Some lifetimes end; their slots become reusable but keep stale data for now.
    for handle in particles.drain(100..) {
        supervisor.release(handle)?;
    }

    // An idle tick: scrub the dead slots back to their default state.
    supervisor.perform_idle_maintenance()?;

    // The next allocation observes a pre-cleaned particle at zero hot-path cost.
    let recycled = supervisor.allocate::<Particle>()?;
    let particle = supervisor.get(recycled)?;
    println!("recycled particle starts clean: {particle:?}");

    Ok(())
}
