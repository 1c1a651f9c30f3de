use crate::exec::{ExecScript, LiveExec, LiveParts, live_pair};
use async_trait::async_trait;
use hostshim::engine::{
    ContainerDetails, ContainerRecord, ContainerSpec, ExecSpec, ExecStartOptions, ExecStatus,
    ExecStream, ImageRecord, RuntimeApi,
};
use hostshim_shared::errors::{ShimError, ShimResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A container known to the fake runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: Option<String>,
    pub running: bool,
    pub privileged: bool,
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
    pub cmd: Vec<String>,
}

impl FakeContainer {
    /// A running, unprivileged container such as the parent.
    pub fn running(id: &str, name: &str, image: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            running: true,
            ..Default::default()
        }
    }

    pub fn with_image_id(mut self, image_id: &str) -> Self {
        self.image_id = Some(image_id.to_string());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn stopped(mut self) -> Self {
        self.running = false;
        self
    }

    pub fn with_bind(mut self, bind: &str) -> Self {
        self.binds.push(bind.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    fn record(&self) -> ContainerRecord {
        ContainerRecord {
            id: self.id.clone(),
            names: vec![format!("/{}", self.name)],
            image: self.image.clone(),
            image_id: self.image_id.clone(),
            labels: self.labels.clone(),
        }
    }

    fn details(&self) -> ContainerDetails {
        ContainerDetails {
            id: self.id.clone(),
            name: format!("/{}", self.name),
            image: self.image.clone(),
            running: self.running,
            privileged: self.privileged,
            binds: self.binds.clone(),
            labels: self.labels.clone(),
        }
    }
}

enum Responder {
    Script(ExecScript),
    Live(Option<LiveParts>),
}

struct FakeExec {
    container_id: String,
    spec: ExecSpec,
    started: bool,
    exit_code: Arc<Mutex<Option<i64>>>,
}

#[derive(Default)]
struct State {
    containers: Vec<FakeContainer>,
    images: HashMap<String, ImageRecord>,
    responders: Vec<(String, Responder)>,
    execs: HashMap<String, FakeExec>,
    exec_order: Vec<String>,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, String>,
    arrivals: HashMap<&'static str, FakeContainer>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }

    fn container_mut(&mut self, id: &str) -> ShimResult<&mut FakeContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| no_such("container", id))
    }
}

fn no_such(kind: &str, id: &str) -> ShimError {
    ShimError::Runtime {
        operation: "lookup",
        message: format!("no such {kind}: {id}"),
    }
}

/// In-memory container runtime.
///
/// Exec commands are matched against registered responders by substring of
/// the `sh -c` command line, most recent registration first. Unmatched execs
/// print nothing and exit 0.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime with a running parent container named `parent_name`.
    pub fn with_parent(parent_name: &str, image: &str) -> Self {
        let runtime = Self::new();
        runtime.add_container(
            FakeContainer::running("parent0000001", parent_name, image)
                .with_image_id(&format!("sha256:{image}")),
        );
        runtime
    }

    pub fn add_container(&self, container: FakeContainer) {
        self.state.lock().containers.push(container);
    }

    /// Make `reference` pullable and inspectable.
    pub fn add_image(&self, reference: &str, image: ImageRecord) {
        self.state.lock().images.insert(reference.to_string(), image);
    }

    /// Reply to commands containing `pattern` with `script`.
    pub fn respond(&self, pattern: &str, script: ExecScript) {
        self.state
            .lock()
            .responders
            .push((pattern.to_string(), Responder::Script(script)));
    }

    /// Attach the next command containing `pattern` to a live exec.
    pub fn respond_live(&self, pattern: &str, tty: bool) -> LiveExec {
        let (live, parts) = live_pair(tty);
        self.state
            .lock()
            .responders
            .push((pattern.to_string(), Responder::Live(Some(parts))));
        live
    }

    /// Make the next call to `operation` fail with `message`.
    pub fn fail_next(&self, operation: &'static str, message: &str) {
        self.state
            .lock()
            .failures
            .insert(operation, message.to_string());
    }

    /// Add `container` just before the next call to `operation` runs, as if
    /// another client created it concurrently.
    pub fn add_before_next(&self, operation: &'static str, container: FakeContainer) {
        self.state.lock().arrivals.insert(operation, container);
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.clone()
    }

    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// How many times `operation` was called.
    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    /// Exec specs in creation order.
    pub fn exec_specs(&self) -> Vec<ExecSpec> {
        let state = self.state.lock();
        state
            .exec_order
            .iter()
            .filter_map(|id| state.execs.get(id))
            .map(|exec| exec.spec.clone())
            .collect()
    }

    /// The `sh -c` argument of every exec, in creation order.
    pub fn exec_commands(&self) -> Vec<String> {
        self.exec_specs()
            .into_iter()
            .filter_map(|spec| spec.cmd.last().cloned())
            .collect()
    }

    /// Container each exec ran in, in creation order.
    pub fn exec_containers(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .exec_order
            .iter()
            .filter_map(|id| state.execs.get(id))
            .map(|exec| exec.container_id.clone())
            .collect()
    }

    fn enter(&self, operation: &'static str) -> ShimResult<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        state.calls.push(operation);
        if let Some(container) = state.arrivals.remove(operation) {
            state.containers.push(container);
        }
        match state.failures.remove(operation) {
            Some(message) => Err(ShimError::Runtime { operation, message }),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl RuntimeApi for FakeRuntime {
    async fn list_containers(&self, all: bool) -> ShimResult<Vec<ContainerRecord>> {
        let state = self.enter("list_containers")?;
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.running)
            .map(FakeContainer::record)
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> ShimResult<()> {
        let state = self.enter("pull_image")?;
        if state.images.contains_key(reference) {
            Ok(())
        } else {
            Err(ShimError::Runtime {
                operation: "pull_image",
                message: format!("pull access denied for {reference}"),
            })
        }
    }

    async fn inspect_image(&self, reference: &str) -> ShimResult<ImageRecord> {
        let state = self.enter("inspect_image")?;
        state
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| no_such("image", reference))
    }

    async fn get_container(&self, id: &str) -> ShimResult<ContainerDetails> {
        let mut state = self.enter("get_container")?;
        Ok(state.container_mut(id)?.details())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ShimResult<String> {
        let mut state = self.enter("create_container")?;
        let id = state.next_id("c");
        let name = format!("unnamed_{id}");
        state.containers.push(FakeContainer {
            id: id.clone(),
            name,
            image: spec.image.clone(),
            image_id: None,
            running: false,
            privileged: spec.privileged,
            binds: spec.binds.clone(),
            labels: spec.labels.clone(),
            cmd: spec.cmd.clone(),
        });
        Ok(id)
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> ShimResult<()> {
        let mut state = self.enter("rename_container")?;
        if state
            .containers
            .iter()
            .any(|c| c.id != id && c.name == new_name)
        {
            return Err(ShimError::Runtime {
                operation: "rename_container",
                message: format!("name {new_name} is already in use"),
            });
        }
        state.container_mut(id)?.name = new_name.to_string();
        Ok(())
    }

    async fn start_container(&self, id: &str) -> ShimResult<()> {
        let mut state = self.enter("start_container")?;
        state.container_mut(id)?.running = true;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> ShimResult<()> {
        let mut state = self.enter("remove_container")?;
        state.containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn exec_create(&self, container_id: &str, spec: &ExecSpec) -> ShimResult<String> {
        let mut state = self.enter("exec_create")?;
        if !state.container_mut(container_id)?.running {
            return Err(ShimError::Runtime {
                operation: "exec_create",
                message: format!("container {container_id} is not running"),
            });
        }
        let id = state.next_id("e");
        state.execs.insert(
            id.clone(),
            FakeExec {
                container_id: container_id.to_string(),
                spec: spec.clone(),
                started: false,
                exit_code: Arc::new(Mutex::new(None)),
            },
        );
        state.exec_order.push(id.clone());
        Ok(id)
    }

    async fn exec_start(&self, exec_id: &str, options: ExecStartOptions) -> ShimResult<ExecStream> {
        let mut state = self.enter("exec_start")?;
        let command = {
            let exec = state
                .execs
                .get_mut(exec_id)
                .ok_or_else(|| no_such("exec", exec_id))?;
            if exec.started {
                return Err(ShimError::Runtime {
                    operation: "exec_start",
                    message: format!("exec {exec_id} already started"),
                });
            }
            exec.started = true;
            exec.spec.cmd.join(" ")
        };

        let responder = state
            .responders
            .iter_mut()
            .rev()
            .find(|(pattern, responder)| {
                command.contains(pattern.as_str())
                    && !matches!(responder, Responder::Live(None))
            })
            .map(|(_, responder)| responder);

        let (output, input, exit_code) = match responder {
            Some(Responder::Script(script)) => {
                let exit = script.exit();
                let script = script.clone();
                (script.into_stream(), None, Arc::new(Mutex::new(exit)))
            }
            Some(Responder::Live(parts)) => match parts.take() {
                Some(parts) => {
                    let (output, stdin, exit_code) = parts.into_stream();
                    (output, Some(stdin), exit_code)
                }
                None => unreachable!("consumed live responders are skipped"),
            },
            None => (
                ExecScript::new().into_stream(),
                None,
                Arc::new(Mutex::new(Some(0))),
            ),
        };

        if let Some(exec) = state.execs.get_mut(exec_id) {
            exec.exit_code = exit_code;
        }

        let input = match (options.stdin, input) {
            (true, Some(stdin)) => Some(Box::pin(stdin) as hostshim::engine::ExecInput),
            (true, None) => Some(Box::pin(tokio::io::sink()) as hostshim::engine::ExecInput),
            (false, _) => None,
        };
        Ok(ExecStream { output, input })
    }

    async fn exec_inspect(&self, exec_id: &str) -> ShimResult<ExecStatus> {
        let state = self.enter("exec_inspect")?;
        let exec = state
            .execs
            .get(exec_id)
            .ok_or_else(|| no_such("exec", exec_id))?;
        let exit_code = *exec.exit_code.lock();
        Ok(ExecStatus {
            running: exit_code.is_none(),
            exit_code,
        })
    }
}
