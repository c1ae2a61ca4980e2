//! When to ask the model for the next move
//!
//! The world streams frames continuously; most of them only refresh the
//! agent's picture of its surroundings. A decision is considered after each
//! `tickEnd` (or after a quiet period) and is taken only if enough time has
//! passed or something worth reacting to happened.

use serde_json::{Map, Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use unifai_core::config::ThinkConfig;

/// Frame `type` values sent by the world server
pub mod frame_types {
    pub const MAP: &str = "map";
    pub const PLAYERS: &str = "players";
    pub const ASSETS: &str = "assets";
    pub const INVENTORY: &str = "inventory";
    pub const STATE: &str = "state";
    pub const AVAILABLE_ACTIONS: &str = "availableActions";
    pub const TICK_END: &str = "tickEnd";
    pub const SYSTEM: &str = "system";
}

/// Latest value of every world frame kind, plus the part of the map and
/// player list the agent can see
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    pub map: Option<Value>,
    pub players: Option<Value>,
    pub assets: Option<Value>,
    pub inventory: Option<Value>,
    pub state: Option<Value>,
    pub available_actions: Option<Value>,
    /// `{buildings, smart_buildings, my_houses}`, set once both the agent's
    /// position and a building list are known
    pub nearby_map: Option<Value>,
    /// Other players, closest first
    pub nearby_players: Option<Value>,
}

/// How far the agent sees. Anything within range is described; beyond it,
/// the closest `min_*` entries still are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vision {
    pub building_range: f64,
    pub player_range: f64,
    pub min_buildings: usize,
    pub min_players: usize,
}

impl Default for Vision {
    fn default() -> Self {
        Self {
            building_range: 16.0,
            player_range: 16.0,
            min_buildings: 10,
            min_players: 10,
        }
    }
}

impl Vision {
    pub fn from_config(config: &ThinkConfig) -> Self {
        Self {
            building_range: config.vision_range_buildings as f64,
            player_range: config.vision_range_players as f64,
            min_buildings: config.min_num_buildings,
            min_players: config.min_num_players,
        }
    }
}

fn coord(obj: &Value, key: &str, short: &str) -> Option<f64> {
    obj.get(key).or_else(|| obj.get(short)).and_then(Value::as_f64)
}

/// Grid (Manhattan) distance from the agent. Objects without a position are
/// infinitely far.
fn distance(obj: &Value, state: &Value) -> f64 {
    let here = (coord(state, "locationX", "x"), coord(state, "locationY", "y"));
    let there = (coord(obj, "locationX", "x"), coord(obj, "locationY", "y"));
    match (here, there) {
        ((Some(x0), Some(y0)), (Some(x1), Some(y1))) => (x1 - x0).abs() + (y1 - y0).abs(),
        _ => f64::INFINITY,
    }
}

fn has_position(state: &Value) -> bool {
    state.is_object()
        && state.get("playerID").is_some()
        && state.get("locationX").is_some()
        && state.get("locationY").is_some()
}

/// Tag each object with its distance and sort closest first
fn by_distance(items: &[Value], position: impl Fn(&Value) -> f64) -> Vec<(f64, Value)> {
    let mut sorted: Vec<(f64, Value)> = items
        .iter()
        .filter_map(|item| {
            let d = position(item);
            let mut item = item.as_object()?.clone();
            item.insert("distance".to_string(), distance_json(d));
            Some((d, Value::Object(item)))
        })
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    sorted
}

/// Drop the fields the model never needs
fn trim_building(building: &Value) -> Value {
    let mut building = building.clone();
    if let Some(fields) = building.as_object_mut() {
        fields.remove("boundary");
        fields.remove("rent");
    }
    building
}

fn distance_json(d: f64) -> Value {
    if d.is_finite() { json!(d) } else { Value::Null }
}

/// Everything within `range`, topped up to `min` with the next closest
fn within(sorted: &[(f64, Value)], range: f64, min: usize) -> Vec<Value> {
    let mut out = Vec::new();
    for (d, item) in sorted {
        if *d > range && out.len() >= min {
            break;
        }
        out.push(item.clone());
    }
    out
}

/// Buildings around the agent, the smart buildings it could use, and the
/// houses it rents
pub fn nearby_map(map: &Value, assets: Option<&Value>, state: &Value, vision: &Vision) -> Option<Value> {
    if !has_position(state) {
        return None;
    }
    let buildings: Vec<Value> = map.get("buildings")?.as_array()?.iter().map(trim_building).collect();
    let at_entrance = |b: &Value| b.get("entrance").map_or(f64::INFINITY, |e| distance(e, state));

    let sorted = by_distance(&buildings, at_entrance);
    let nearby = within(&sorted, vision.building_range, vision.min_buildings);

    let smart: Vec<Value> = sorted
        .iter()
        .filter_map(|(_, b)| {
            let mut b = b.as_object()?.clone();
            let names = match b.get("smartActions") {
                Some(Value::Object(actions)) if !actions.is_empty() => {
                    Value::Array(actions.keys().map(|k| json!(k)).collect())
                }
                Some(Value::Array(actions)) if !actions.is_empty() => Value::Array(actions.clone()),
                _ => return None,
            };
            b.insert("smartActions".to_string(), names);
            Some(Value::Object(b))
        })
        .collect();

    let houses = match assets
        .and_then(|a| a.get("rentedBuildings"))
        .and_then(Value::as_array)
    {
        Some(rented) => within(
            &by_distance(&rented.iter().map(trim_building).collect::<Vec<_>>(), at_entrance),
            vision.building_range,
            vision.min_buildings,
        ),
        None => Vec::new(),
    };

    let mut out = Map::new();
    out.insert("buildings".to_string(), Value::Array(nearby));
    out.insert("smart_buildings".to_string(), Value::Array(smart));
    out.insert("my_houses".to_string(), Value::Array(houses));
    Some(Value::Object(out))
}

/// Other players around the agent, closest first
pub fn nearby_players(players: &Value, state: &Value, vision: &Vision) -> Option<Value> {
    if !has_position(state) {
        return None;
    }
    let players = players.as_array().filter(|p| !p.is_empty())?;
    let me = state.get("playerID");
    let others: Vec<Value> = players
        .iter()
        .filter(|p| p.get("playerID") != me)
        .cloned()
        .collect();
    let sorted = by_distance(&others, |p| distance(p, state));
    Some(Value::Array(within(&sorted, vision.player_range, vision.min_players)))
}

#[derive(Debug)]
pub struct ThinkScheduler {
    min_interval: Duration,
    max_interval: Duration,
    interval: Duration,
    last_think: Option<Instant>,
    use_model: bool,
    vision: Vision,
    snapshot: WorldSnapshot,
    system_messages: Vec<Value>,
    other_messages: Vec<Value>,
}

impl ThinkScheduler {
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        let max_interval = max_interval.max(min_interval);
        Self {
            min_interval,
            max_interval,
            interval: min_interval,
            last_think: None,
            use_model: false,
            vision: Vision::default(),
            snapshot: WorldSnapshot::default(),
            system_messages: Vec::new(),
            other_messages: Vec::new(),
        }
    }

    pub fn from_config(config: &ThinkConfig) -> Self {
        Self::new(
            Duration::from_secs(config.min_model_interval_secs),
            Duration::from_secs(config.max_model_interval_secs),
        )
        .with_vision(Vision::from_config(config))
    }

    pub fn with_vision(mut self, vision: Vision) -> Self {
        self.vision = vision;
        self
    }

    /// Fold one frame into the snapshot. Returns true when the frame ends a
    /// tick, i.e. a decision should be considered now.
    pub fn observe(&mut self, frame: &Value) -> bool {
        let kind = frame.get("type").and_then(Value::as_str).unwrap_or_default();
        let data = frame.get("data").cloned().unwrap_or(Value::Null);

        if !matches!(kind, frame_types::TICK_END | frame_types::MAP | frame_types::PLAYERS) {
            info!("Received: {} {}", kind, data);
        }

        match kind {
            frame_types::MAP => self.snapshot.map = Some(data),
            frame_types::PLAYERS => self.snapshot.players = Some(data),
            frame_types::TICK_END => {}
            frame_types::ASSETS => {
                self.snapshot.assets = Some(data);
                self.use_model = true;
            }
            frame_types::INVENTORY => {
                self.snapshot.inventory = Some(data);
                self.use_model = true;
            }
            frame_types::AVAILABLE_ACTIONS => {
                self.snapshot.available_actions = Some(data);
                self.use_model = true;
            }
            frame_types::STATE => {
                match data.get("state").and_then(Value::as_str) {
                    Some("moving") => {}
                    Some("learning") | Some("working") => self.interval = self.max_interval,
                    _ => self.interval = self.min_interval,
                }
                self.snapshot.state = Some(data);
                self.use_model = true;
            }
            frame_types::SYSTEM => {
                self.system_messages.push(frame.clone());
                self.use_model = true;
            }
            _ => {
                self.other_messages.push(frame.clone());
                self.use_model = true;
            }
        }

        if matches!(
            kind,
            frame_types::MAP | frame_types::PLAYERS | frame_types::ASSETS | frame_types::STATE
        ) {
            self.refresh_nearby();
        }

        kind == frame_types::TICK_END
    }

    fn refresh_nearby(&mut self) {
        let snapshot = &mut self.snapshot;
        let Some(state) = snapshot.state.as_ref() else {
            return;
        };
        if let Some(map) = snapshot.map.as_ref() {
            if let Some(nearby) = nearby_map(map, snapshot.assets.as_ref(), state, &self.vision) {
                snapshot.nearby_map = Some(nearby);
            }
        }
        if let Some(players) = snapshot.players.as_ref() {
            if let Some(nearby) = nearby_players(players, state, &self.vision) {
                snapshot.nearby_players = Some(nearby);
            }
        }
    }

    /// Nothing arrived for a whole receive window
    pub fn on_idle(&mut self) {
        self.use_model = true;
    }

    pub fn should_think(&self, now: Instant) -> bool {
        if !self.system_messages.is_empty() {
            return true;
        }
        let elapsed = match self.last_think {
            Some(at) => now.saturating_duration_since(at),
            None => self.max_interval,
        };
        if elapsed < self.interval {
            debug!("Skipping think: {:?} since last, interval {:?}", elapsed, self.interval);
            return false;
        }
        if elapsed < self.max_interval && !self.use_model {
            debug!("Skipping think: nothing new");
            return false;
        }
        true
    }

    /// Record a completed decision
    pub fn after_think(&mut self, now: Instant) {
        self.system_messages.clear();
        self.other_messages.clear();
        self.last_think = Some(now);
        self.use_model = false;
        self.interval = self.min_interval;
    }

    pub fn snapshot(&self) -> &WorldSnapshot {
        &self.snapshot
    }

    pub fn system_messages(&self) -> &[Value] {
        &self.system_messages
    }

    pub fn other_messages(&self) -> &[Value] {
        &self.other_messages
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn use_model(&self) -> bool {
        self.use_model
    }

    pub fn vision(&self) -> &Vision {
        &self.vision
    }
}
