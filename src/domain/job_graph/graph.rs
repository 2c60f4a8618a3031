use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::job_graph::artifact::Artifact;
use crate::domain::job_graph::task::{TaskDescriptor, TaskState};
use crate::domain::utils::id::{ArtifactId, TaskId};
use crate::error::{Error, Result};

new_key_type! {
    pub struct TaskKey;
}

/// Directed acyclic graph of tasks for one pipeline run.
///
/// Tasks live in a `SlotMap`; `TaskId`s are resolved through `index`.
/// Insertion order is kept in `order` and is the fallback submission order.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    tasks: SlotMap<TaskKey, TaskDescriptor>,
    order: Vec<TaskKey>,
    index: HashMap<TaskId, TaskKey>,

    artifacts: HashMap<ArtifactId, Artifact>,
    artifact_order: Vec<ArtifactId>,

    /// Direct dependents, filled by `validate`.
    dependents: SecondaryMap<TaskKey, Vec<TaskKey>>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from hand-made parts and validates it.
    pub fn from_tasks(tasks: Vec<TaskDescriptor>, artifacts: Vec<Artifact>) -> Result<Self> {
        let mut graph = JobGraph::new();
        for artifact in artifacts {
            graph.add_artifact(artifact)?;
        }
        for task in tasks {
            graph.add_task(task)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Adds a task. Fails if the id is already taken.
    pub fn add_task(&mut self, task: TaskDescriptor) -> Result<TaskKey> {
        if self.index.contains_key(&task.id) {
            return Err(Error::GraphBuildError(format!("duplicate task id '{}'", task.id)));
        }
        let id = task.id.clone();
        let key = self.tasks.insert(task);
        self.order.push(key);
        self.index.insert(id, key);
        Ok(key)
    }

    /// Registers an artifact. Re-registering the same artifact is a no-op,
    /// a second producer for the same id is an error.
    pub fn add_artifact(&mut self, artifact: Artifact) -> Result<()> {
        if let Some(existing) = self.artifacts.get(&artifact.id) {
            if existing == &artifact {
                return Ok(());
            }
            return Err(Error::GraphBuildError(format!(
                "artifact '{}' registered twice with different producers or paths ({:?} vs {:?})",
                artifact.id, existing.producer, artifact.producer
            )));
        }
        self.artifact_order.push(artifact.id.clone());
        self.artifacts.insert(artifact.id.clone(), artifact);
        Ok(())
    }

    /// Checks that every dependency and artifact resolves, that artifact
    /// producers agree with task outputs and that there is no cycle.
    pub fn validate(&mut self) -> Result<()> {
        let mut dependents: SecondaryMap<TaskKey, Vec<TaskKey>> = SecondaryMap::new();
        for &key in &self.order {
            dependents.insert(key, Vec::new());
        }

        for &key in &self.order {
            let task = &self.tasks[key];
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(Error::GraphBuildError(format!("task '{}' depends on itself", task.id)));
                }
                let dep_key = self
                    .index
                    .get(dep)
                    .ok_or_else(|| Error::GraphBuildError(format!("task '{}' depends on unknown task '{}'", task.id, dep)))?;
                if let Some(list) = dependents.get_mut(*dep_key) {
                    list.push(key);
                }
            }

            for input in &task.inputs {
                if !self.artifacts.contains_key(input) {
                    return Err(Error::GraphBuildError(format!("task '{}' consumes unknown artifact '{}'", task.id, input)));
                }
            }
            for output in &task.outputs {
                match self.artifacts.get(output) {
                    Some(artifact) if artifact.producer.as_ref() == Some(&task.id) => {}
                    Some(artifact) => {
                        return Err(Error::GraphBuildError(format!(
                            "task '{}' lists output '{}' which is produced by {:?}",
                            task.id, output, artifact.producer
                        )));
                    }
                    None => return Err(Error::GraphBuildError(format!("task '{}' produces unknown artifact '{}'", task.id, output))),
                }
            }
        }

        for artifact in self.artifacts.values() {
            if let Some(producer) = &artifact.producer {
                let key = self
                    .index
                    .get(producer)
                    .ok_or_else(|| Error::GraphBuildError(format!("artifact '{}' is produced by unknown task '{}'", artifact.id, producer)))?;
                if !self.tasks[*key].outputs.contains(&artifact.id) {
                    return Err(Error::GraphBuildError(format!("task '{}' does not list its artifact '{}' as output", producer, artifact.id)));
                }
            }
        }

        self.dependents = dependents;
        self.topological_order()?;
        Ok(())
    }

    /// Kahn's algorithm, ties broken by insertion order.
    pub fn topological_order(&self) -> Result<Vec<TaskKey>> {
        let mut in_degree: SecondaryMap<TaskKey, usize> = SecondaryMap::new();
        for &key in &self.order {
            in_degree.insert(key, self.tasks[key].dependencies.len());
        }

        let mut queue: VecDeque<TaskKey> = self.order.iter().copied().filter(|k| in_degree[*k] == 0).collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(key) = queue.pop_front() {
            sorted.push(key);
            for &dependent in self.direct_dependents(key) {
                let degree = &mut in_degree[dependent];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if sorted.len() != self.order.len() {
            let placed: HashSet<TaskKey> = sorted.iter().copied().collect();
            let mut cyclic: Vec<String> = self.order.iter().filter(|k| !placed.contains(k)).map(|k| self.tasks[*k].id.to_string()).collect();
            cyclic.truncate(10);
            return Err(Error::GraphBuildError(format!("dependency cycle among tasks: {}", cyclic.join(", "))));
        }
        Ok(sorted)
    }

    fn direct_dependents(&self, key: TaskKey) -> &[TaskKey] {
        self.dependents.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of tasks that transitively depend on each task.
    pub fn descendant_counts(&self) -> Result<SecondaryMap<TaskKey, usize>> {
        let topo = self.topological_order()?;
        let mut descendants: SecondaryMap<TaskKey, HashSet<TaskKey>> = SecondaryMap::new();

        for &key in topo.iter().rev() {
            let mut set = HashSet::new();
            for &dependent in self.direct_dependents(key) {
                set.insert(dependent);
                if let Some(below) = descendants.get(dependent) {
                    set.extend(below.iter().copied());
                }
            }
            descendants.insert(key, set);
        }

        let mut counts = SecondaryMap::new();
        for (key, set) in descendants {
            counts.insert(key, set.len());
        }
        Ok(counts)
    }

    pub fn dependents_of(&self, id: &TaskId) -> Vec<&TaskDescriptor> {
        match self.index.get(id) {
            Some(&key) => self.direct_dependents(key).iter().map(|k| &self.tasks[*k]).collect(),
            None => Vec::new(),
        }
    }

    pub fn key_of(&self, id: &TaskId) -> Option<TaskKey> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskDescriptor> {
        self.index.get(id).and_then(|k| self.tasks.get(*k))
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskDescriptor> {
        let key = *self.index.get(id)?;
        self.tasks.get_mut(key)
    }

    pub fn task(&self, key: TaskKey) -> Option<&TaskDescriptor> {
        self.tasks.get(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[TaskKey] {
        &self.order
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.order.iter().map(move |k| &self.tasks[*k])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn state_of(&self, id: &TaskId) -> Option<TaskState> {
        self.get(id).map(|t| t.state)
    }

    pub fn artifact(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    /// Artifacts in registration order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifact_order.iter().filter_map(move |id| self.artifacts.get(id))
    }

    /// An artifact may be consumed once it is external or its producer
    /// reached `Success`.
    pub fn is_artifact_valid(&self, id: &ArtifactId) -> bool {
        match self.artifacts.get(id) {
            Some(artifact) => match &artifact.producer {
                None => true,
                Some(producer) => self.state_of(producer) == Some(TaskState::Success),
            },
            None => false,
        }
    }

    /// Tasks in insertion order together with all artifacts, for persisting.
    pub fn to_parts(&self) -> (Vec<TaskDescriptor>, Vec<Artifact>) {
        (self.tasks().cloned().collect(), self.artifacts().cloned().collect())
    }
}
