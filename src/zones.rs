//! # Spatial Zone Index
//! Maps a source or vessel to a zone code. Resolution order:
//! explicit binding, polygon containment (registration order), name rule, default.

use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::{NameRule, ZonesConfig};
use crate::feeds::{FeedRegistry, SourceSnapshot};
use crate::geo::{point_in_polygon, Coord};
use crate::positions::VesselPosition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub code: String,
    #[serde(default)]
    pub polygon: Vec<Coord>,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Inputs for one zone lookup.
#[derive(Debug, Clone, Default)]
pub struct ZoneQuery<'a> {
    /// Source to make a polygon match sticky for.
    pub source_id: Option<&'a str>,
    pub explicit: Option<&'a str>,
    pub point: Option<Coord>,
    pub names: Vec<&'a str>,
}

impl<'a> ZoneQuery<'a> {
    pub fn for_source(s: &'a SourceSnapshot) -> Self {
        Self {
            source_id: Some(&s.id),
            explicit: s.zone.as_deref(),
            point: (!s.coord.is_unset()).then_some(s.coord),
            names: vec![s.id.as_str(), s.name.as_str()],
        }
    }

    /// Vessels match on position first, then on their terminal names.
    pub fn for_vessel(v: &'a VesselPosition) -> Self {
        let coord = v.coord();
        let mut names = Vec::new();
        if let Some(t) = v.departing_terminal.as_deref() {
            names.push(t);
        }
        if let Some(t) = v.arriving_terminal.as_deref() {
            names.push(t);
        }
        Self {
            source_id: None,
            explicit: None,
            point: (!coord.is_unset()).then_some(coord),
            names,
        }
    }
}

#[derive(Debug)]
pub struct ZoneIndex {
    registry: Arc<FeedRegistry>,
    zones: RwLock<Vec<Zone>>,
    names: Vec<NameRule>,
    default_zone: Option<String>,
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl ZoneIndex {
    pub fn new(registry: Arc<FeedRegistry>, cfg: &ZonesConfig) -> Self {
        let names = cfg
            .names
            .iter()
            .filter(|r| !squash(&r.pattern).is_empty() && !r.zone.trim().is_empty())
            .cloned()
            .collect();
        Self {
            registry,
            zones: RwLock::new(Vec::new()),
            names,
            default_zone: cfg.default_zone.clone(),
        }
    }

    pub fn zones(&self) -> Vec<Zone> {
        self.zones.read().expect("zones rwlock poisoned").clone()
    }

    pub fn default_zone(&self) -> Option<&str> {
        self.default_zone.as_deref()
    }

    /// Resolve a zone code; `None` only when nothing matches and there is no default.
    pub fn assign_zone(&self, q: &ZoneQuery<'_>) -> Option<String> {
        if let Some(code) = q.explicit.map(str::trim).filter(|c| !c.is_empty()) {
            return Some(code.to_string());
        }

        if let Some(p) = q.point {
            let hit = {
                let zones = self.zones.read().expect("zones rwlock poisoned");
                zones
                    .iter()
                    .find(|z| point_in_polygon(p, &z.polygon))
                    .map(|z| z.code.clone())
            };
            if let Some(code) = hit {
                if let Some(id) = q.source_id {
                    self.adopt(&code, id);
                }
                return Some(code);
            }
        }

        let squashed: Vec<String> = q.names.iter().map(|n| squash(n)).collect();
        for rule in &self.names {
            let pat = squash(&rule.pattern);
            if squashed.iter().any(|n| n.contains(&pat)) {
                return Some(rule.zone.clone());
            }
        }

        self.default_zone.clone()
    }

    /// Register (or replace) a zone and bind its members to it.
    /// Returns the member ids that exist in the registry.
    pub fn bind_zone(&self, code: &str, polygon: Vec<Coord>, members: Vec<String>) -> Result<Vec<String>> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() {
            bail!("zone code must not be empty");
        }
        if !polygon.is_empty() && polygon.len() < 3 {
            bail!("zone polygon needs at least 3 vertices, got {}", polygon.len());
        }

        let mut zones = self.zones.write().expect("zones rwlock poisoned");
        if let Some(pos) = zones.iter().position(|z| z.code == code) {
            let old = zones.remove(pos);
            for id in &old.members {
                self.registry.clear_zone_if(id, &old.code);
            }
        }

        let mut bound = Vec::new();
        for id in members {
            if self.registry.set_zone(&id, Some(code.clone())) {
                if !bound.contains(&id) {
                    bound.push(id);
                }
            } else {
                tracing::warn!(target: "zones", zone = %code, source = %id, "unknown zone member skipped");
            }
        }

        tracing::info!(target: "zones", zone = %code, members = bound.len(), vertices = polygon.len(), "zone bound");
        zones.push(Zone {
            code,
            polygon,
            members: bound.clone(),
        });
        Ok(bound)
    }

    /// Remove a zone and clear any member binding that still points at it.
    pub fn unbind_zone(&self, code: &str) -> bool {
        let code = code.trim().to_ascii_uppercase();
        let mut zones = self.zones.write().expect("zones rwlock poisoned");
        let Some(pos) = zones.iter().position(|z| z.code == code) else {
            return false;
        };
        let old = zones.remove(pos);
        for id in &old.members {
            self.registry.clear_zone_if(id, &old.code);
        }
        tracing::info!(target: "zones", zone = %code, "zone unbound");
        true
    }

    fn adopt(&self, code: &str, source_id: &str) {
        let mut zones = self.zones.write().expect("zones rwlock poisoned");
        let Some(zone) = zones.iter_mut().find(|z| z.code == code) else {
            return;
        };
        if !self.registry.set_zone(source_id, Some(code.to_string())) {
            return;
        }
        if !zone.members.iter().any(|m| m == source_id) {
            zone.members.push(source_id.to_string());
        }
    }
}
