//! DraftFlow session simulator.
//!
//! Runs two participants over the in-memory store and presence hubs through
//! a script of concurrent edits, then prints the converged scene as JSON.
//!
//! ```text
//! draftflow-sim [config.json]
//! ```
//!
//! Exits with status 1 if the replicas disagree at the end.

use std::path::Path;
use std::process::ExitCode;

use draftflow_core::sync::MemorySceneStore;
use draftflow_core::{
    CollaborationSession, EditError, Geometry, ManualClock, MemoryHub, MemoryPresenceHub,
    ParticipantId, Property, StoreError, SyncConfig, ToolKind,
};
use kurbo::Vec2;

/// Simulated milliseconds between ticks.
const TICK_MS: u64 = 250;

type SimResult<T> = Result<T, Box<dyn std::error::Error>>;

struct Simulation {
    clock: ManualClock,
    participants: Vec<CollaborationSession>,
}

impl Simulation {
    /// Advance the clock and tick every participant, `rounds` times.
    fn settle(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.clock.advance(TICK_MS);
            for session in &mut self.participants {
                session.tick();
            }
        }
    }
}

fn session(
    id: u64,
    name: &str,
    store: MemorySceneStore,
    presence: &MemoryPresenceHub,
    clock: &ManualClock,
    config: &SyncConfig,
) -> CollaborationSession {
    CollaborationSession::new(
        ParticipantId(id),
        name,
        Box::new(store),
        Box::new(presence.connect()),
        Box::new(clock.clone()),
        config.clone(),
    )
}

fn run(config: SyncConfig) -> SimResult<bool> {
    let store = MemoryHub::new();
    store.set_duplicate_delivery(true);
    let presence = MemoryPresenceHub::new();
    let clock = ManualClock::new(1_700_000_000_000);

    // Bob's connection drops his first two writes.
    let mut bob_store = store.connect();
    bob_store.fail_next(StoreError::Transient("connection reset".to_string()));
    bob_store.fail_next(StoreError::Transient("connection reset".to_string()));

    let mut ada = session(1, "Ada", store.connect(), &presence, &clock, &config);
    let mut bob = session(2, "Bob", bob_store, &presence, &clock, &config);
    ada.join()?;
    bob.join()?;

    let mut sim = Simulation {
        clock: clock.clone(),
        participants: vec![ada, bob],
    };
    sim.settle(2);

    // Ada draws a rectangle and starts styling it.
    let [ada, _] = &mut sim.participants[..] else {
        return Err("expected two participants".into());
    };
    ada.select_tool(ToolKind::Rectangle);
    let rect = ada
        .complete_creation(Geometry::new(40.0, 40.0, 160.0, 90.0))
        .ok_or("rectangle tool created nothing")?
        .id();
    ada.edit_attribute(rect, Property::Fill, "#ff0000")?;
    sim.settle(2);

    // Bob tries to resize it while Ada holds the claim.
    let [ada, bob] = &mut sim.participants[..] else {
        return Err("expected two participants".into());
    };
    bob.click_object(rect)?;
    match bob.edit_attribute(rect, Property::Width, "50") {
        Err(EditError::ObjectLocked { owner, .. }) => {
            log::info!("Bob is locked out of {} by {}", rect, owner);
        }
        other => log::warn!("Expected a lock, got {:?}", other),
    }
    ada.click_empty();
    sim.settle(2);

    // Claim released: both edit different attributes of the same object.
    let [ada, bob] = &mut sim.participants[..] else {
        return Err("expected two participants".into());
    };
    bob.edit_attribute(rect, Property::Width, "50")?;
    bob.click_empty();
    ada.click_object(rect)?;
    ada.drag_by(rect, Vec2::new(25.0, 10.0))?;
    ada.click_empty();

    // Bob adds a caption and an ellipse; Ada moves the ellipse as Bob deletes it.
    bob.select_tool(ToolKind::Text);
    let caption = bob
        .complete_creation(Geometry::new(40.0, 150.0, 200.0, 40.0))
        .ok_or("text tool created nothing")?
        .id();
    bob.edit_attribute(caption, Property::Text, "Quarterly plan")?;
    bob.edit_attribute(caption, Property::FontWeight, "800")?;
    bob.open_category("shapes");
    bob.choose_variant(ToolKind::Ellipse);
    let ellipse = bob
        .complete_creation(Geometry::new(300.0, 60.0, 80.0, 80.0))
        .ok_or("ellipse tool created nothing")?
        .id();
    bob.click_empty();
    sim.settle(4);

    let [ada, bob] = &mut sim.participants[..] else {
        return Err("expected two participants".into());
    };
    bob.delete_object(ellipse)?;
    ada.drag_by(ellipse, Vec2::new(-10.0, 0.0))?;
    ada.bring_to_front(rect)?;
    sim.settle(40);

    let [ada, bob] = &mut sim.participants[..] else {
        return Err("expected two participants".into());
    };
    let converged = ada.document() == bob.document() && !ada.document().contains(ellipse);
    println!("{}", ada.document().to_json()?);
    if ada.is_out_of_sync() || bob.is_out_of_sync() {
        log::warn!("A participant is still out of sync");
    }
    ada.leave();
    bob.leave();
    Ok(converged)
}

fn main() -> ExitCode {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match SyncConfig::from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::from(2);
            }
        },
        None => SyncConfig::default(),
    };

    match run(config) {
        Ok(true) => {
            log::info!("Replicas converged");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("Replicas diverged");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
