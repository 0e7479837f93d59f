use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::world::coords::Position;

/// A capability carried by an entity. Components own their state and expose
/// it to persistence as an opaque tagged payload.
pub trait Component: Send {
    /// Discriminator used to rebuild the component at load time.
    fn kind(&self) -> &'static str;

    /// Advances the component by one tick, with mutable access to the
    /// entity's body.
    fn update(&mut self, body: &mut EntityBody);

    /// Exports the component's state.
    fn export(&self) -> Value;
}

/// The physical part of an entity: position and velocity, in tiles and
/// tiles-per-tick. Split from [`Entity`] so components can mutate it while
/// they are borrowed from the entity's slots.
#[derive(Debug, Clone, Copy)]
pub struct EntityBody {
    pub pos: Position,
    pub dx: f32,
    pub dy: f32,
}

/// A live entity: a body plus three privileged component slots (controller,
/// core, physics) and an ordered list of extras.
pub struct Entity {
    pub id: u64,
    pub body: EntityBody,
    controller: Option<Box<dyn Component>>,
    core: Option<Box<dyn Component>>,
    physics: Option<Box<dyn Component>>,
    extras: Vec<Box<dyn Component>>,
}

impl Entity {
    pub fn new(id: u64, pos: Position) -> Self {
        Self {
            id,
            body: EntityBody {
                pos,
                dx: 0.0,
                dy: 0.0,
            },
            controller: None,
            core: None,
            physics: None,
            extras: Vec::new(),
        }
    }

    pub fn with_controller(mut self, c: Box<dyn Component>) -> Self {
        self.controller = Some(c);
        self
    }

    pub fn with_core(mut self, c: Box<dyn Component>) -> Self {
        self.core = Some(c);
        self
    }

    pub fn with_physics(mut self, c: Box<dyn Component>) -> Self {
        self.physics = Some(c);
        self
    }

    pub fn add_extra(&mut self, c: Box<dyn Component>) {
        self.extras.push(c);
    }

    /// Advances the entity by one tick: component slots in order, then
    /// velocity integration.
    pub fn update(&mut self) {
        for slot in [&mut self.controller, &mut self.core, &mut self.physics] {
            if let Some(mut c) = slot.take() {
                c.update(&mut self.body);
                *slot = Some(c);
            }
        }
        let mut extras = std::mem::take(&mut self.extras);
        for c in &mut extras {
            c.update(&mut self.body);
        }
        self.extras = extras;

        let (dx, dy) = (self.body.dx, self.body.dy);
        if dx != 0.0 || dy != 0.0 {
            self.body.pos.add(dx, dy);
        }
    }

    /// Exports the entity for persistence.
    pub fn export(&self) -> EntityData {
        let slot = |c: &Option<Box<dyn Component>>| {
            c.as_ref().map(|c| ComponentData {
                kind: c.kind().to_owned(),
                payload: c.export(),
            })
        };
        EntityData {
            pos: self.body.pos,
            dx: self.body.dx,
            dy: self.body.dy,
            controller: slot(&self.controller),
            core: slot(&self.core),
            physics: slot(&self.physics),
            extras: self
                .extras
                .iter()
                .map(|c| ComponentData {
                    kind: c.kind().to_owned(),
                    payload: c.export(),
                })
                .collect(),
        }
    }

    /// Rebuilds an entity from persisted data. Components whose kind the
    /// codec does not know are dropped with a warning.
    pub fn import(id: u64, data: &EntityData, codec: &ComponentCodec) -> Self {
        let slot = |c: &Option<ComponentData>| c.as_ref().and_then(|c| codec.build(c));
        let mut e = Self::new(id, data.pos);
        e.body.dx = data.dx;
        e.body.dy = data.dy;
        e.controller = slot(&data.controller);
        e.core = slot(&data.core);
        e.physics = slot(&data.physics);
        e.extras = data.extras.iter().filter_map(|c| codec.build(c)).collect();
        e
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("pos", &self.body.pos)
            .finish_non_exhaustive()
    }
}

/// One exported component: discriminator plus opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    pub kind: String,
    pub payload: Value,
}

/// Persisted form of an entity. Stored in the `entities` list of the region
/// document that contained the entity when it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub pos: Position,
    pub dx: f32,
    pub dy: f32,
    pub controller: Option<ComponentData>,
    pub core: Option<ComponentData>,
    pub physics: Option<ComponentData>,
    #[serde(default)]
    pub extras: Vec<ComponentData>,
}

type ComponentBuilder = fn(&Value) -> Box<dyn Component>;

/// Maps component kinds to constructors. Built during bootstrap and frozen.
pub struct ComponentCodec {
    builders: HashMap<&'static str, ComponentBuilder>,
}

impl ComponentCodec {
    /// Codec knowing the engine's built-in components.
    pub fn with_defaults() -> Self {
        let mut builders: HashMap<&'static str, ComponentBuilder> = HashMap::new();
        builders.insert("inert", |payload| Box::new(Inert::from_payload(payload)));
        Self { builders }
    }

    pub fn build(&self, data: &ComponentData) -> Option<Box<dyn Component>> {
        match self.builders.get(data.kind.as_str()) {
            Some(builder) => Some(builder(&data.payload)),
            None => {
                log::warn!("dropping unknown entity component kind '{}'", data.kind);
                None
            }
        }
    }
}

/// Built-in core component with no behaviour; its payload round-trips
/// untouched, which is all most scenery entities need.
pub struct Inert {
    payload: Value,
}

impl Inert {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    fn from_payload(payload: &Value) -> Self {
        Self {
            payload: payload.clone(),
        }
    }
}

impl Component for Inert {
    fn kind(&self) -> &'static str {
        "inert"
    }

    fn update(&mut self, _body: &mut EntityBody) {}

    fn export(&self) -> Value {
        self.payload.clone()
    }
}
