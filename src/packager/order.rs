//! Dependency ordering of a project set.
//!
//! [`resolve`] is a stable depth-first topological sort: projects keep their
//! first-occurrence order unless a dependency forces them later. Cycles are a
//! configuration error and are reported with the projects on the loop.

use super::collaborators::ProjectModel;
use super::error::{Error, Result};
use super::project::Project;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Orders `projects` so that each one follows every project it transitively
/// depends on. Duplicates collapse to their first occurrence.
///
/// Dependencies outside the given set are walked (so ordering constraints
/// through them hold) but not emitted.
pub fn resolve(projects: &[Project], model: &dyn ProjectModel) -> Result<Vec<Project>> {
    let wanted: HashSet<&str> = projects.iter().map(|p| p.name()).collect();
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    let mut order = Vec::new();

    for project in projects {
        visit(project, model, &wanted, &mut marks, &mut path, &mut order)?;
    }

    log::debug!(
        "build order: {}",
        order.iter().map(Project::name).collect::<Vec<_>>().join(", ")
    );
    Ok(order)
}

fn visit(
    project: &Project,
    model: &dyn ProjectModel,
    wanted: &HashSet<&str>,
    marks: &mut HashMap<String, Mark>,
    path: &mut Vec<String>,
    order: &mut Vec<Project>,
) -> Result<()> {
    match marks.get(project.name()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path
                .iter()
                .position(|n| n == project.name())
                .unwrap_or(0);
            let mut members = path[start..].to_vec();
            members.push(project.name().to_string());
            return Err(Error::DependencyCycle { members });
        }
        None => {}
    }

    marks.insert(project.name().to_string(), Mark::Visiting);
    path.push(project.name().to_string());

    for dependency in model.list_dependencies(project)? {
        visit(&dependency, model, wanted, marks, path, order)?;
    }

    path.pop();
    marks.insert(project.name().to_string(), Mark::Done);
    if wanted.contains(project.name()) {
        order.push(project.clone());
    }
    Ok(())
}

/// Every project `project` transitively depends on, dependencies first.
pub fn dependency_closure(project: &Project, model: &dyn ProjectModel) -> Result<Vec<Project>> {
    let mut closure: Vec<Project> = Vec::new();
    let mut stack = vec![(project.clone(), false)];
    let mut seen = HashSet::new();

    while let Some((current, expanded)) = stack.pop() {
        if expanded {
            if current.name() != project.name() {
                closure.push(current);
            }
            continue;
        }
        if !seen.insert(current.name().to_string()) {
            continue;
        }
        let dependencies = model.list_dependencies(&current)?;
        stack.push((current, true));
        for dependency in dependencies.into_iter().rev() {
            if !seen.contains(dependency.name()) {
                stack.push((dependency, false));
            }
        }
    }
    Ok(closure)
}

/// Splits `projects` into those that can be ordered and those that sit on, or
/// depend on, a dependency cycle.
///
/// The second list pairs every excluded project with the cycle error that
/// disqualified it.
pub fn partition_cycles(
    projects: &[Project],
    model: &dyn ProjectModel,
) -> Result<(Vec<Project>, Vec<(Project, Error)>)> {
    let mut graph: DiGraph<Project, ()> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
    let mut pending: Vec<Project> = projects.to_vec();

    // dependency -> dependent edges over the whole closure
    while let Some(project) = pending.pop() {
        if nodes.contains_key(project.name()) {
            continue;
        }
        let index = graph.add_node(project.clone());
        nodes.insert(project.name().to_string(), index);
        pending.extend(model.list_dependencies(&project)?);
    }
    for index in graph.node_indices().collect::<Vec<_>>() {
        let project = graph[index].clone();
        for dependency in model.list_dependencies(&project)? {
            if let Some(&dep) = nodes.get(dependency.name()) {
                graph.add_edge(dep, index, ());
            }
        }
    }

    let mut poisoned: HashMap<NodeIndex, Vec<String>> = HashMap::new();
    for component in petgraph::algo::tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || graph.find_edge(component[0], component[0]).is_some();
        if !is_cycle {
            continue;
        }
        let mut members: Vec<String> = component
            .iter()
            .map(|&n| graph[n].name().to_string())
            .collect();
        members.sort();
        if let Some(first) = members.first().cloned() {
            members.push(first);
        }

        // everything reachable from the cycle depends on it
        for &start in &component {
            let mut dfs = Dfs::new(&graph, start);
            while let Some(node) = dfs.next(&graph) {
                poisoned.entry(node).or_insert_with(|| members.clone());
            }
        }
    }

    if poisoned.is_empty() {
        return Ok((resolve(projects, model)?, Vec::new()));
    }

    let mut ok = Vec::new();
    let mut excluded = Vec::new();
    let mut seen = HashSet::new();
    for project in projects {
        if !seen.insert(project.name()) {
            continue;
        }
        match poisoned.get(&nodes[project.name()]) {
            Some(members) => excluded.push((
                project.clone(),
                Error::DependencyCycle {
                    members: members.clone(),
                },
            )),
            None => ok.push(project.clone()),
        }
    }

    Ok((resolve(&ok, model)?, excluded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{ProjectBuilder, StaticProjectModel, Toolchain};

    fn project(name: &str, deps: &[&str]) -> Project {
        ProjectBuilder::new(name)
            .root(format!("/work/{name}"))
            .toolchain(Toolchain::new("/opt/jde", "5.0.0"))
            .dependencies(deps.iter().map(|d| d.to_string()).collect())
            .build()
            .unwrap()
    }

    fn names(projects: &[Project]) -> Vec<&str> {
        projects.iter().map(Project::name).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let all = vec![
            project("app", &["ui", "core"]),
            project("ui", &["core"]),
            project("core", &[]),
            project("tool", &[]),
        ];
        let model = StaticProjectModel::new(all.clone());
        let order = resolve(&all, &model).unwrap();
        assert_eq!(names(&order), ["core", "ui", "app", "tool"]);

        for (i, p) in order.iter().enumerate() {
            for dep in p.dependency_names() {
                let j = order.iter().position(|q| q.name() == dep).unwrap();
                assert!(j < i, "{dep} must precede {}", p.name());
            }
        }
    }

    #[test]
    fn duplicates_collapse() {
        let core = project("core", &[]);
        let app = project("app", &["core"]);
        let model = StaticProjectModel::new([core.clone(), app.clone()]);
        let order = resolve(&[app.clone(), core.clone(), app], &model).unwrap();
        assert_eq!(names(&order), ["core", "app"]);
    }

    #[test]
    fn order_holds_through_projects_outside_the_set() {
        let all = vec![
            project("app", &["mid"]),
            project("mid", &["base"]),
            project("base", &[]),
        ];
        let model = StaticProjectModel::new(all.clone());
        let order = resolve(&[all[0].clone(), all[2].clone()], &model).unwrap();
        assert_eq!(names(&order), ["base", "app"]);
    }

    #[test]
    fn cycle_is_fatal() {
        let all = vec![project("a", &["b"]), project("b", &["a"])];
        let model = StaticProjectModel::new(all.clone());
        match resolve(&all, &model) {
            Err(Error::DependencyCycle { members }) => assert_eq!(members, ["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let all = vec![project("a", &["a"])];
        let model = StaticProjectModel::new(all.clone());
        assert!(matches!(
            resolve(&all, &model),
            Err(Error::DependencyCycle { .. })
        ));
    }

    #[test]
    fn partition_keeps_independent_projects() {
        let all = vec![
            project("a", &["b"]),
            project("b", &["a"]),
            project("c", &["a"]),
            project("d", &[]),
        ];
        let model = StaticProjectModel::new(all.clone());
        let (ok, excluded) = partition_cycles(&all, &model).unwrap();
        assert_eq!(names(&ok), ["d"]);
        let mut bad: Vec<&str> = excluded.iter().map(|(p, _)| p.name()).collect();
        bad.sort();
        assert_eq!(bad, ["a", "b", "c"]);
    }

    #[test]
    fn closure_lists_transitive_dependencies_first() {
        let all = vec![
            project("app", &["ui", "net"]),
            project("ui", &["core"]),
            project("net", &["core"]),
            project("core", &[]),
        ];
        let model = StaticProjectModel::new(all.clone());
        let closure = dependency_closure(&all[0], &model).unwrap();
        assert_eq!(names(&closure), ["core", "ui", "net"]);
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let all = vec![project("a", &["ghost"])];
        let model = StaticProjectModel::new(all.clone());
        assert!(matches!(
            resolve(&all, &model),
            Err(Error::UnknownDependency { .. })
        ));
    }
}
