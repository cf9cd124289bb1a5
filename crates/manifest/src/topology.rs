//! Dependency ordering for manifest modules

use std::collections::{HashMap, VecDeque};

use hotload_errors::{Error, ManifestError};

use crate::{Module, OrderedMap};

/// Reorder `modules` so every module follows all of its dependencies.
///
/// Kahn's algorithm; modules with no pending dependencies are emitted in
/// their input order, so an already sorted map comes back unchanged.
///
/// # Errors
/// Returns an error for duplicate ids, dependencies on ids that are not in
/// the map, or dependency cycles.
pub fn topological_sort(modules: OrderedMap<Module>) -> Result<OrderedMap<Module>, Error> {
    let entries = modules.into_entries();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(entries.len());
    for (i, (id, _)) in entries.iter().enumerate() {
        if index.insert(id.as_str(), i).is_some() {
            return Err(ManifestError::DuplicateModule {
                module_id: id.clone(),
            }
            .into());
        }
    }

    // Calculate in-degrees and the reverse edges
    let mut in_degree = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (i, (id, module)) in entries.iter().enumerate() {
        for dependency in &module.depends_on_ids {
            let Some(&dep) = index.get(dependency.as_str()) else {
                return Err(ManifestError::UnknownDependency {
                    module_id: id.clone(),
                    dependency: dependency.clone(),
                }
                .into());
            };
            in_degree[i] += 1;
            dependents[dep].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &downstream in &dependents[i] {
            in_degree[downstream] -= 1;
            if in_degree[downstream] == 0 {
                queue.push_back(downstream);
            }
        }
    }

    if order.len() != entries.len() {
        let stuck = in_degree
            .iter()
            .position(|&degree| degree > 0)
            .map_or_else(String::new, |i| entries[i].0.clone());
        return Err(ManifestError::CyclicDependency { module_id: stuck }.into());
    }

    let mut slots: Vec<Option<(String, Module)>> = entries.into_iter().map(Some).collect();
    let sorted = order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect();
    Ok(OrderedMap::from_entries(sorted))
}

/// Check that every module appears after all of its dependencies.
///
/// # Errors
/// Returns `ManifestError::NotTopologicallySorted` naming the first module
/// that references a dependency not yet seen.
pub fn check_topologically_sorted(modules: &OrderedMap<Module>) -> Result<(), ManifestError> {
    let mut seen: Vec<&str> = Vec::with_capacity(modules.len());
    for (id, module) in modules.iter() {
        if let Some(missing) = module
            .depends_on_ids
            .iter()
            .find(|dependency| !seen.contains(&dependency.as_str()))
        {
            return Err(ManifestError::NotTopologicallySorted {
                module_id: id.to_string(),
                dependency: missing.clone(),
            });
        }
        seen.push(id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotload_hash::Hash;

    fn module(deps: &[&str]) -> Module {
        Module {
            url: "m.bin".into(),
            sha256: Hash::from_data(b"m"),
            depends_on_ids: deps.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    fn ids(map: &OrderedMap<Module>) -> Vec<&str> {
        map.keys().collect()
    }

    #[test]
    fn sorts_dependencies_first() {
        let modules: OrderedMap<Module> = [
            ("app", module(&["lib", "stdlib"])),
            ("lib", module(&["stdlib"])),
            ("stdlib", module(&[])),
        ]
        .into_iter()
        .collect();
        let sorted = topological_sort(modules).unwrap();
        assert_eq!(ids(&sorted), ["stdlib", "lib", "app"]);
        assert!(check_topologically_sorted(&sorted).is_ok());
    }

    #[test]
    fn sorted_input_is_stable() {
        let modules: OrderedMap<Module> = [
            ("a", module(&[])),
            ("b", module(&[])),
            ("c", module(&["a"])),
        ]
        .into_iter()
        .collect();
        let sorted = topological_sort(modules.clone()).unwrap();
        assert_eq!(sorted, modules);
    }

    #[test]
    fn cycle_is_rejected() {
        let modules: OrderedMap<Module> = [("a", module(&["b"])), ("b", module(&["a"]))]
            .into_iter()
            .collect();
        let err = topological_sort(modules).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let modules: OrderedMap<Module> = [("a", module(&["ghost"]))].into_iter().collect();
        assert!(topological_sort(modules).is_err());
    }

    #[test]
    fn unsorted_order_is_reported() {
        let modules: OrderedMap<Module> = [("b", module(&["a"])), ("a", module(&[]))]
            .into_iter()
            .collect();
        let err = check_topologically_sorted(&modules).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::NotTopologicallySorted { ref module_id, .. } if module_id == "b"
        ));
    }
}
