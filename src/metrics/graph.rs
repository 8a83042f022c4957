//! KPI dependency graph.

use std::collections::{BTreeSet, HashMap};
use waypoint_common::KpiId;

use super::kpi::KpiDefinition;
use crate::errors::ConfigurationError;

/// Group KPI definitions into evaluation layers using Kahn's algorithm.
///
/// Every KPI in a layer depends only on KPIs in earlier layers. Returns
/// indices into `definitions`, each layer in definition order.
pub fn evaluation_layers(
    definitions: &[KpiDefinition],
) -> Result<Vec<Vec<usize>>, ConfigurationError> {
    let mut index_map: HashMap<&KpiId, usize> = HashMap::new();
    for (i, def) in definitions.iter().enumerate() {
        if index_map.insert(&def.id, i).is_some() {
            return Err(ConfigurationError::DuplicateId {
                kind: "kpi",
                id: def.id.to_string(),
            });
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];
    let mut in_degree: Vec<usize> = vec![0; definitions.len()];
    for (i, def) in definitions.iter().enumerate() {
        let inputs: BTreeSet<&KpiId> = def.formula.inputs().into_iter().collect();
        for input in inputs {
            let &dep = index_map
                .get(input)
                .ok_or_else(|| ConfigurationError::UnknownKpiInput {
                    kpi: def.id.clone(),
                    input: input.clone(),
                })?;
            dependents[dep].push(i);
            in_degree[i] += 1;
        }
    }

    let mut layers = Vec::new();
    let mut ready: Vec<usize> = (0..definitions.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !ready.is_empty() {
        processed += ready.len();
        let mut next = Vec::new();
        for &node in &ready {
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        layers.push(std::mem::replace(&mut ready, next));
    }

    if processed != definitions.len() {
        let mut kpis: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg > 0)
            .map(|(i, _)| definitions[i].id.to_string())
            .collect();
        kpis.sort();
        return Err(ConfigurationError::KpiCycle { kpis });
    }

    Ok(layers)
}
