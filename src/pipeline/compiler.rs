use super::compiled_plan::{ExecutionPlan, PlanStats, PlannedCopy, PlannedStep, PlannedTarget};
use super::error::TopologyError;
use super::id::{CopyId, StepId};
use super::queue::QueuePair;
use super::registry::StepRegistry;
use crate::config::{StepConfig, Topology};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Validates a topology and allocates its queue-pairs.
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compile a topology into an execution plan.
    ///
    /// Checks step names, copy counts, hops, step types, partitioning and
    /// error handling, rejects cycles, then allocates one queue-pair per
    /// (producer copy, consumer copy) connection chosen by [`Self::dispatch`].
    /// Disabled hops are ignored.
    pub fn compile(
        topology: &Topology,
        registry: &StepRegistry,
        queue_capacity: usize,
    ) -> Result<ExecutionPlan, TopologyError> {
        let start_time = std::time::Instant::now();

        if queue_capacity == 0 {
            return Err(TopologyError::InvalidCapacity);
        }
        if topology.steps.is_empty() {
            return Err(TopologyError::Empty(topology.name.clone()));
        }

        let index = Self::validate_steps(topology, registry)?;
        let hops = Self::validate_hops(topology, &index)?;
        Self::validate_error_handling(topology, &index, &hops)?;
        let order = Self::topological_sort(topology, &hops)?;

        let steps = &topology.steps;
        let mut copies: Vec<Vec<PlannedCopy>> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                (0..step.copies)
                    .map(|copy| PlannedCopy {
                        id: CopyId::new(StepId(i as u32), copy),
                        inputs: Vec::new(),
                        targets: Vec::new(),
                        error_target: None,
                    })
                    .collect()
            })
            .collect();
        let mut pairs = Vec::new();

        for &(from, to) in &hops {
            let (producer, consumer) = (&steps[from], &steps[to]);
            let mut per_producer: Vec<Vec<Arc<QueuePair>>> = vec![Vec::new(); producer.copies];
            for (s, t) in Self::dispatch(producer, consumer) {
                let name = format!("{}.{} - {}.{}", producer.name, s, consumer.name, t);
                let pair = Arc::new(QueuePair::new(name, queue_capacity));
                per_producer[s].push(pair.clone());
                copies[to][t].inputs.push(pair.clone());
                pairs.push(pair);
            }

            let is_error_hop = producer
                .error_handling
                .as_ref()
                .is_some_and(|eh| eh.target == consumer.name);
            let key_fields = consumer
                .partitioning
                .as_ref()
                .map(|p| p.fields.clone())
                .unwrap_or_default();
            for (copy, pairs) in per_producer.into_iter().enumerate() {
                let target = PlannedTarget {
                    step: consumer.name.clone(),
                    pairs,
                    key_fields: key_fields.clone(),
                };
                let planned = &mut copies[from][copy];
                if is_error_hop {
                    planned.error_target = Some(target);
                } else {
                    planned.targets.push(target);
                }
            }
        }

        let (fwd_adj, bwd_adj) = Self::build_adjacency(steps.len(), &hops);
        let stats = PlanStats {
            steps: steps.len(),
            copies: steps.iter().map(|s| s.copies).sum(),
            hops: hops.len(),
            disabled_hops: topology.hops.iter().filter(|h| !h.enabled).count(),
            queue_pairs: pairs.len(),
            source_steps: bwd_adj.iter().filter(|adj| adj.is_empty()).count(),
            sink_steps: fwd_adj.iter().filter(|adj| adj.is_empty()).count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        let planned_steps = steps
            .iter()
            .zip(copies)
            .enumerate()
            .map(|(i, (config, copies))| PlannedStep {
                id: StepId(i as u32),
                config: config.clone(),
                copies,
            })
            .collect();

        tracing::debug!(
            pipeline = %topology.name,
            steps = stats.steps,
            copies = stats.copies,
            pairs = stats.queue_pairs,
            "topology compiled"
        );

        Ok(ExecutionPlan {
            name: topology.name.clone(),
            steps: planned_steps,
            order,
            pairs,
            stats,
        })
    }

    /// Producer-copy → consumer-copy connections for one hop.
    ///
    /// - 1→1, 1→N and N→1: one pair per copy of the "many" side.
    /// - N→N without repartitioning: copy *i* feeds copy *i*.
    /// - Anything else: full mesh.
    pub fn dispatch(from: &StepConfig, to: &StepConfig) -> Vec<(usize, usize)> {
        let (producers, consumers) = (from.copies, to.copies);
        if producers == 1 {
            (0..consumers).map(|t| (0, t)).collect()
        } else if consumers == 1 {
            (0..producers).map(|s| (s, 0)).collect()
        } else if producers == consumers && !Self::repartitions(from, to) {
            (0..producers).map(|c| (c, c)).collect()
        } else {
            (0..producers)
                .flat_map(|s| (0..consumers).map(move |t| (s, t)))
                .collect()
        }
    }

    /// Rows must be redistributed when the partitioning changes across a hop.
    fn repartitions(from: &StepConfig, to: &StepConfig) -> bool {
        match (&from.partitioning, &to.partitioning) {
            (Some(a), b) => Some(a) != b.as_ref(),
            (None, b) => b.is_some(),
        }
    }

    fn validate_steps(
        topology: &Topology,
        registry: &StepRegistry,
    ) -> Result<HashMap<String, usize>, TopologyError> {
        let mut index = HashMap::new();
        for (i, step) in topology.steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                return Err(TopologyError::DuplicateStep(step.name.clone()));
            }
            if step.copies == 0 {
                return Err(TopologyError::InvalidCopies {
                    step: step.name.clone(),
                    copies: step.copies,
                });
            }
            if !registry.contains(&step.step_type) {
                return Err(TopologyError::UnknownStepType {
                    step: step.name.clone(),
                    step_type: step.step_type.clone(),
                });
            }
            if let Some(partitioning) = &step.partitioning {
                if partitioning.fields.is_empty() {
                    return Err(TopologyError::InvalidPartitioning {
                        step: step.name.clone(),
                        reason: "no key fields".to_string(),
                    });
                }
                if partitioning.fields.iter().any(|f| f.trim().is_empty()) {
                    return Err(TopologyError::InvalidPartitioning {
                        step: step.name.clone(),
                        reason: "blank key field".to_string(),
                    });
                }
            }
        }
        Ok(index)
    }

    /// Enabled hops as (producer index, consumer index).
    fn validate_hops(
        topology: &Topology,
        index: &HashMap<String, usize>,
    ) -> Result<Vec<(usize, usize)>, TopologyError> {
        let mut seen = HashSet::new();
        let mut hops = Vec::new();
        for hop in topology.hops.iter().filter(|h| h.enabled) {
            let (Some(&from), Some(&to)) = (index.get(&hop.from), index.get(&hop.to)) else {
                return Err(TopologyError::DanglingHop {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            };
            if !seen.insert((from, to)) {
                return Err(TopologyError::DuplicateHop {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            }
            hops.push((from, to));
        }
        Ok(hops)
    }

    fn validate_error_handling(
        topology: &Topology,
        index: &HashMap<String, usize>,
        hops: &[(usize, usize)],
    ) -> Result<(), TopologyError> {
        for (from, step) in topology.steps.iter().enumerate() {
            let Some(handling) = &step.error_handling else {
                continue;
            };
            let connected = index
                .get(&handling.target)
                .is_some_and(|&to| hops.contains(&(from, to)));
            if !connected {
                return Err(TopologyError::MissingErrorHop {
                    step: step.name.clone(),
                    target: handling.target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Build forward and backward adjacency lists
    fn build_adjacency(n: usize, hops: &[(usize, usize)]) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let mut fwd_adj = vec![Vec::new(); n];
        let mut bwd_adj = vec![Vec::new(); n];
        for &(from, to) in hops {
            fwd_adj[from].push(to);
            bwd_adj[to].push(from);
        }
        (fwd_adj, bwd_adj)
    }

    /// Topological sort using Kahn's algorithm; leftover steps form a cycle.
    fn topological_sort(
        topology: &Topology,
        hops: &[(usize, usize)],
    ) -> Result<Vec<StepId>, TopologyError> {
        let n = topology.steps.len();
        let (adj, _) = Self::build_adjacency(n, hops);
        let mut in_degree = vec![0usize; n];
        for &(_, to) in hops {
            in_degree[to] += 1;
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);
        while let Some(step) = queue.pop_front() {
            result.push(StepId(step as u32));
            for &next in &adj[step] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if result.len() < n {
            let cyclic = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| topology.steps[i].name.clone())
                .collect();
            return Err(TopologyError::CycleDetected(cyclic));
        }
        Ok(result)
    }
}
