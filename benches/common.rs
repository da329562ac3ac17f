#![allow(dead_code)]

use swarm_ecs::prelude::*;

pub const AGENTS_SMALL: u32 = 10_000;
pub const AGENTS_MED: u32 = 100_000;
pub const AGENTS_LARGE: u32 = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Component for Position {
    const ID: ComponentId = 1;
    const FREQUENCY: Frequency = Frequency::Frequent;
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

impl Component for Wealth {
    const ID: ComponentId = 2;
    const FREQUENCY: Frequency = Frequency::Freq6;
}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}

impl Component for Productivity {
    const ID: ComponentId = 40;
    const FREQUENCY: Frequency = Frequency::Freq4;
}

pub fn make_world() -> Registry {
    let mut registry = Registry::new();
    registry.define_component::<Position>().unwrap();
    registry.define_component::<Wealth>().unwrap();
    registry.define_component::<Productivity>().unwrap();
    registry
}

pub fn populate(registry: &mut Registry, agent_count: u32) {
    registry
        .create_entities(agent_count, |_| {
            (
                Position { x: 0.0, y: 0.0 },
                Wealth { value: 100.0 },
                Productivity { rate: 1.0 },
            )
        })
        .unwrap();
}
