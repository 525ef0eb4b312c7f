//! Demand and Plan: what a pod asks for, and where it was placed
//!
//! A `Demand` is the ordered sequence of per-container GPU requests of one
//! pod. A `Plan` pairs each of those requests with the card index chosen for
//! it; the index list is what gets written to the pod's plan annotation at
//! bind time. One container maps to exactly one card.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::labels;
use crate::types::Pod;

/// GPU request of a single container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Compute share in core units, 1..=100
    pub core: u32,

    /// Memory in MiB, positive
    pub memory: u64,
}

/// Ordered per-container GPU requests of one pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demand(Vec<ContainerRequest>);

impl Demand {
    /// Derive the demand from a pod's container resource requests.
    ///
    /// A container is GPU-bearing iff it declares both the core and the
    /// memory request. A pod with no GPU-bearing containers yields an empty
    /// demand and is not a GPU pod. A container declaring only one of the
    /// two keys, or an out-of-range value, makes the pod malformed.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let mut requests = Vec::new();
        for container in &pod.containers {
            let core = container.requests.get(labels::CORE_RESOURCE);
            let memory = container.requests.get(labels::MEMORY_RESOURCE);
            let (core, memory) = match (core, memory) {
                (Some(c), Some(m)) => (c, m),
                (None, None) => continue,
                _ => {
                    return Err(Error::malformed_pod(
                        pod.full_name(),
                        format!(
                            "container {} declares only one of {} and {}",
                            container.name,
                            labels::CORE_RESOURCE,
                            labels::MEMORY_RESOURCE
                        ),
                    ))
                }
            };
            let core: u32 = core.parse().map_err(|_| {
                Error::malformed_pod(
                    pod.full_name(),
                    format!("container {} core request {:?} is not an integer", container.name, core),
                )
            })?;
            if core == 0 || core > labels::CORE_UNITS_PER_CARD {
                return Err(Error::malformed_pod(
                    pod.full_name(),
                    format!("container {} core request {} outside 1..=100", container.name, core),
                ));
            }
            let memory: u64 = memory.parse().map_err(|_| {
                Error::malformed_pod(
                    pod.full_name(),
                    format!(
                        "container {} memory request {:?} is not an integer",
                        container.name, memory
                    ),
                )
            })?;
            if memory == 0 {
                return Err(Error::malformed_pod(
                    pod.full_name(),
                    format!("container {} memory request must be positive", container.name),
                ));
            }
            requests.push(ContainerRequest { core, memory });
        }
        Ok(Self(requests))
    }

    /// Number of GPU-bearing containers; each needs its own card
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the pod requests no GPUs at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the requests in container order
    pub fn iter(&self) -> std::slice::Iter<'_, ContainerRequest> {
        self.0.iter()
    }

    /// The requests in container order
    pub fn requests(&self) -> &[ContainerRequest] {
        &self.0
    }
}

impl FromIterator<ContainerRequest> for Demand {
    fn from_iter<I: IntoIterator<Item = ContainerRequest>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One container's placement: the chosen card plus the request it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUnit {
    /// Card index on the target node
    pub gpu_index: usize,

    /// Compute share committed on that card
    pub core: u32,

    /// Memory MiB committed on that card
    pub memory: u64,
}

impl PlanUnit {
    /// The request this unit commits on its card
    pub fn request(&self) -> ContainerRequest {
        ContainerRequest {
            core: self.core,
            memory: self.memory,
        }
    }
}

/// The chosen card indices for one pod, one per GPU-bearing container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan(Vec<PlanUnit>);

impl Plan {
    /// Build a plan from chosen indices paired with the demand they satisfy
    pub fn new(units: Vec<PlanUnit>) -> Self {
        Self(units)
    }

    /// Reconstruct the plan of an already-bound pod from its plan annotation
    /// joined with its demand.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let demand = Demand::from_pod(pod)?;
        let annotation = pod.plan_annotation().ok_or_else(|| {
            Error::malformed_plan(pod.full_name(), format!("missing {} annotation", labels::PLAN_ANNOTATION))
        })?;
        let indices: Vec<usize> = annotation
            .split(',')
            .map(|part| {
                part.trim().parse().map_err(|_| {
                    Error::malformed_plan(
                        pod.full_name(),
                        format!("card index {:?} is not an integer", part),
                    )
                })
            })
            .collect::<Result<_>>()?;
        if indices.len() != demand.len() {
            return Err(Error::malformed_plan(
                pod.full_name(),
                format!(
                    "annotation lists {} cards but the pod has {} GPU containers",
                    indices.len(),
                    demand.len()
                ),
            ));
        }
        let units = indices
            .into_iter()
            .zip(demand.iter())
            .map(|(gpu_index, req)| PlanUnit {
                gpu_index,
                core: req.core,
                memory: req.memory,
            })
            .collect();
        Ok(Self(units))
    }

    /// The compact annotation form: comma-separated card indices
    pub fn annotation_value(&self) -> String {
        self.0
            .iter()
            .map(|u| u.gpu_index.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Chosen card indices in container order
    pub fn indices(&self) -> Vec<usize> {
        self.0.iter().map(|u| u.gpu_index).collect()
    }

    /// The placement units in container order
    pub fn units(&self) -> &[PlanUnit] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
