//! Scenario loading and validation
//!
//! A scenario names a set of placeholder workloads, a list of timed scale
//! commands against them, and a total run duration. Loading validates the
//! document and expands any repeat interval into one-shot events so the
//! scheduler only ever sees a flat, sorted list.

mod duration;
mod quantity;
mod selector;


pub use duration::{format_duration, parse_duration};
pub use quantity::parse_quantity;
pub use selector::{parse_selector, Operator, Requirement};

use crate::error::ScenarioError;
use duration::deserialize_scalar;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prefix applied to every workload object created in the cluster
pub const RESOURCE_PREFIX: &str = "ccmon";

/// A placeholder workload the scenario scales
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub cpu: Quantity,
    pub memory: Quantity,
}

impl WorkloadSpec {
    /// Name of the cluster object backing this workload
    pub fn resource_name(&self) -> String {
        resource_name(&self.name)
    }
}

/// Cluster object name for a scenario workload name
pub fn resource_name(workload: &str) -> String {
    format!("{}-{}", RESOURCE_PREFIX, workload).replace(' ', "-")
}

/// A timed scale command
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingEvent {
    /// Offset from scenario start at which the event fires
    pub offset: Duration,
    /// Scenario workload name
    pub workload: String,
    /// Cluster object name of the workload
    pub resource_name: String,
    pub replicas: i32,
}

/// A validated, expanded scenario
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub duration: Duration,
    pub node_selector: Option<String>,
    pub workloads: Vec<WorkloadSpec>,
    pub repeat_after: Option<Duration>,
    /// Sorted by offset, repeats already expanded
    pub events: Vec<ScalingEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioFile {
    name: String,
    #[serde(deserialize_with = "deserialize_scalar")]
    duration: Option<String>,
    #[serde(alias = "workloads")]
    deployments: Vec<WorkloadFile>,
    #[serde(deserialize_with = "deserialize_scalar")]
    repeat_after: Option<String>,
    events: Vec<EventFile>,
    node_selector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkloadFile {
    name: String,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    cpu: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    memory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventFile {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    time: Option<String>,
    #[serde(alias = "workload")]
    deployment: String,
    replicas: i32,
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Load and validate a scenario from any reader
    pub fn from_reader(mut reader: impl Read) -> Result<Self, ScenarioError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    /// Load and validate a scenario from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let file: ScenarioFile = serde_yaml::from_str(contents)?;
        file.validate()
    }

    /// Look up a workload by its scenario name
    pub fn workload(&self, name: &str) -> Option<&WorkloadSpec> {
        self.workloads.iter().find(|w| w.name == name)
    }
}

impl ScenarioFile {
    fn validate(self) -> Result<Scenario, ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::MissingName);
        }

        let duration = match self.duration.as_deref() {
            Some(text) => parse_duration(text)?,
            None => Duration::ZERO,
        };
        if duration.is_zero() {
            return Err(ScenarioError::ZeroDuration);
        }

        if self.events.is_empty() {
            return Err(ScenarioError::NoEvents);
        }

        if let Some(selector) = &self.node_selector {
            parse_selector(selector).map_err(|reason| ScenarioError::InvalidSelector {
                selector: selector.clone(),
                reason,
            })?;
        }

        let mut workloads = Vec::with_capacity(self.deployments.len());
        for w in self.deployments {
            let cpu = validated_quantity(&w.name, "cpu", w.cpu)?;
            let memory = validated_quantity(&w.name, "memory", w.memory)?;
            workloads.push(WorkloadSpec {
                name: w.name,
                cpu,
                memory,
            });
        }

        let mut by_name: HashMap<&str, &WorkloadSpec> = HashMap::new();
        for w in &workloads {
            if by_name.insert(w.name.as_str(), w).is_some() {
                return Err(ScenarioError::DuplicateWorkload(w.name.clone()));
            }
        }

        let mut events = Vec::with_capacity(self.events.len());
        for ev in self.events {
            let workload = by_name
                .get(ev.deployment.as_str())
                .ok_or_else(|| ScenarioError::UnknownWorkload(ev.deployment.clone()))?;
            let offset = match ev.time.as_deref() {
                Some(text) => parse_duration(text)?,
                None => Duration::ZERO,
            };
            events.push(ScalingEvent {
                offset,
                workload: ev.deployment,
                resource_name: workload.resource_name(),
                replicas: ev.replicas,
            });
        }

        let repeat_after = match self.repeat_after.as_deref() {
            Some(text) => {
                let interval = parse_duration(text)?;
                if interval.is_zero() {
                    return Err(ScenarioError::ZeroRepeat);
                }
                Some(interval)
            }
            None => None,
        };

        if let Some(interval) = repeat_after {
            let repeats = expand_repeats(&events, interval, duration)?;
            debug!(
                original = events.len(),
                repeated = repeats.len(),
                "Expanded repeating events"
            );
            events.extend(repeats);
        }
        events.sort_by_key(|ev| ev.offset);

        Ok(Scenario {
            name: self.name,
            duration,
            node_selector: self.node_selector,
            workloads,
            repeat_after,
            events,
        })
    }
}

fn validated_quantity(
    workload: &str,
    field: &'static str,
    value: Option<String>,
) -> Result<Quantity, ScenarioError> {
    let value = value.unwrap_or_default();
    parse_quantity(&value).ok_or_else(|| ScenarioError::InvalidQuantity {
        workload: workload.to_string(),
        field,
        value,
    })
}

/// Upper bound on events synthesized by `repeatAfter`
pub const MAX_EXPANDED_EVENTS: usize = 10_000;

/// Replay `events` every `interval` until `duration` is exhausted
///
/// The first replay starts one interval after the latest original event;
/// each further replay starts one interval after the previous replay's
/// start. Every replay shifts all original offsets by its start, and
/// replayed events landing at or past `duration` are dropped. Returns only
/// the synthesized events, or `TooManyEvents` once more than
/// [`MAX_EXPANDED_EVENTS`] would be produced.
pub fn expand_repeats(
    events: &[ScalingEvent],
    interval: Duration,
    duration: Duration,
) -> Result<Vec<ScalingEvent>, ScenarioError> {
    let mut repeats = Vec::new();
    if interval.is_zero() || events.is_empty() {
        return Ok(repeats);
    }

    let last = events.iter().map(|ev| ev.offset).max().unwrap_or_default();
    let first = events.iter().map(|ev| ev.offset).min().unwrap_or_default();
    let mut next = last.checked_add(interval);
    while let Some(cycle_start) = next {
        match cycle_start.checked_add(first) {
            Some(earliest) if earliest < duration => {}
            _ => break,
        }
        for ev in events {
            let Some(offset) = cycle_start.checked_add(ev.offset) else {
                continue;
            };
            if offset < duration {
                if repeats.len() == MAX_EXPANDED_EVENTS {
                    return Err(ScenarioError::TooManyEvents {
                        limit: MAX_EXPANDED_EVENTS,
                    });
                }
                repeats.push(ScalingEvent {
                    offset,
                    ..ev.clone()
                });
            }
        }
        next = cycle_start.checked_add(interval);
    }
    Ok(repeats)
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<14}{}", "Name:", self.name)?;
        writeln!(f, "{:<14}{}", "Duration:", format_duration(self.duration))?;
        if let Some(selector) = &self.node_selector {
            writeln!(f, "{:<14}{}", "Node selector:", selector)?;
        }
        if let Some(interval) = self.repeat_after {
            writeln!(f, "{:<14}{}", "Repeat after:", format_duration(interval))?;
        }
        for w in &self.workloads {
            writeln!(f, "{:<14}{}", "Workload:", w.name)?;
            writeln!(f, "{:<14}{}", "  - CPU:", w.cpu.0)?;
            writeln!(f, "{:<14}{}", "  - Memory:", w.memory.0)?;
        }
        writeln!(f, "Events")?;
        for ev in &self.events {
            writeln!(
                f,
                " - {} => scale {} to {}",
                format_duration(ev.offset),
                ev.workload,
                ev.replicas
            )?;
        }
        Ok(())
    }
}
