//! An in-memory declarative engine.

use crate::backend::{ChangeSetRequest, EventPage, StackBackend, TemplateSource};
use crate::core::{
    ChangeSetDescription, ChangeSetStatus, ChangeSetType, Outputs, Parameters, StackDescription,
    StackEvent, StackOutput, StackStatus, Tag,
};
use crate::errors::BackendError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes. \
     Submit different information to create a change set.";

/// What a stack does the next time it is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Status(StackStatus),
    Remove,
}

#[derive(Debug)]
struct SimStack {
    description: StackDescription,
    template: Option<TemplateSource>,
    parameters: Parameters,
    tags: Vec<Tag>,
    /// Newest first.
    events: Vec<StackEvent>,
    pending: VecDeque<Transition>,
}

impl SimStack {
    fn new(description: StackDescription) -> Self {
        Self {
            description,
            template: None,
            parameters: Parameters::new(),
            tags: Vec::new(),
            events: Vec::new(),
            pending: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
struct SimChangeSet {
    request: ChangeSetRequest,
    status: ChangeSetStatus,
    reason: Option<String>,
    pending_polls: usize,
}

#[derive(Debug, Clone)]
struct ExecuteFailure {
    status: StackStatus,
    reason: String,
    events: Vec<StackEvent>,
}

#[derive(Debug, Default)]
struct EngineState {
    stacks: BTreeMap<String, SimStack>,
    change_sets: HashMap<String, SimChangeSet>,
    outputs_on_execute: HashMap<String, Outputs>,
    execute_failures: HashMap<String, ExecuteFailure>,
    change_set_failures: HashMap<String, String>,
    describe_failures: HashMap<String, BackendError>,
    requests: Vec<ChangeSetRequest>,
    calls: Vec<(&'static str, String)>,
    credentials_expired: bool,
    change_set_delay: usize,
    in_progress_polls: usize,
    page_size: usize,
    sequence: u64,
}

impl EngineState {
    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn check_credentials(&self) -> Result<(), BackendError> {
        if self.credentials_expired {
            return Err(BackendError::ExpiredToken {
                message: "The security token included in the request is expired".to_string(),
            });
        }
        Ok(())
    }

    fn stack_for_change_set(&self, change_set_id: &str) -> String {
        self.change_sets
            .get(change_set_id)
            .map(|cs| cs.request.stack_name.clone())
            .unwrap_or_else(|| change_set_id.to_string())
    }

    fn find_stack_mut(&mut self, name_or_id: &str) -> Option<&mut SimStack> {
        if self.stacks.contains_key(name_or_id) {
            return self.stacks.get_mut(name_or_id);
        }
        self.stacks
            .values_mut()
            .find(|s| s.description.stack_id == name_or_id)
    }

    fn record_event(&mut self, stack_name: &str, status: StackStatus, reason: Option<String>) {
        let id = self.next_id();
        if let Some(stack) = self.stacks.get_mut(stack_name) {
            let event = StackEvent {
                event_id: format!("event-{id}"),
                stack_id: stack.description.stack_id.clone(),
                stack_name: stack_name.to_string(),
                logical_resource_id: stack_name.to_string(),
                physical_resource_id: Some(stack.description.stack_id.clone()),
                resource_type: "AWS::CloudFormation::Stack".to_string(),
                resource_status: status.as_str().to_string(),
                resource_status_reason: reason,
                timestamp: Utc::now(),
            };
            stack.events.insert(0, event);
        }
    }

    fn in_progress_then(&self, in_progress: StackStatus, last: Transition) -> VecDeque<Transition> {
        let mut pending: VecDeque<Transition> = std::iter::repeat(Transition::Status(in_progress))
            .take(self.in_progress_polls)
            .collect();
        pending.push_back(last);
        pending
    }
}

/// A scriptable stand-in for the declarative engine.
///
/// Stacks live in memory. Change sets are computed immediately (or after a
/// configurable number of polls); an update whose template, parameters and tags
/// match the stack's current ones yields the engine's "no changes" failure.
/// Every call is logged so tests can assert on the exact remote traffic.
#[derive(Debug)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    /// Creates an engine with no stacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                in_progress_polls: 1,
                page_size: 100,
                ..EngineState::default()
            }),
        }
    }

    /// Adds or replaces a stack.
    pub fn insert_stack(&self, description: StackDescription) {
        let name = description.stack_name.clone();
        self.state.lock().stacks.insert(name, SimStack::new(description));
    }

    /// Adds a stack in the given status with the given outputs.
    pub fn insert_stack_with_outputs(&self, name: &str, status: StackStatus, outputs: &[(&str, &str)]) {
        let mut description = StackDescription::new(name, status);
        description.stack_id = stack_arn(name);
        description.outputs = outputs
            .iter()
            .map(|(k, v)| StackOutput::new(*k, *v))
            .collect();
        self.insert_stack(description);
    }

    /// Makes a stack report `statuses` on its next describes, in order.
    pub fn queue_statuses(&self, name: &str, statuses: &[StackStatus]) {
        let mut state = self.state.lock();
        if let Some(stack) = state.stacks.get_mut(name) {
            stack
                .pending
                .extend(statuses.iter().copied().map(Transition::Status));
        }
    }

    /// Appends events to a stack's history; the last element becomes the newest.
    pub fn push_events(&self, name: &str, events: Vec<StackEvent>) {
        let mut state = self.state.lock();
        if let Some(stack) = state.find_stack_mut(name) {
            for event in events {
                stack.events.insert(0, event);
            }
        }
    }

    /// Sets the outputs a stack exposes after its next successful execution.
    pub fn set_outputs(&self, name: &str, outputs: &[(&str, &str)]) {
        let outputs = outputs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.state
            .lock()
            .outputs_on_execute
            .insert(name.to_string(), outputs);
    }

    /// Makes the next execution of a change set for `name` end in `status`.
    pub fn fail_next_execute(&self, name: &str, status: StackStatus, reason: &str) {
        self.fail_next_execute_with_events(name, status, reason, Vec::new());
    }

    /// Like [`fail_next_execute`](Self::fail_next_execute), also recording resource events.
    pub fn fail_next_execute_with_events(
        &self,
        name: &str,
        status: StackStatus,
        reason: &str,
        events: Vec<StackEvent>,
    ) {
        self.state.lock().execute_failures.insert(
            name.to_string(),
            ExecuteFailure {
                status,
                reason: reason.to_string(),
                events,
            },
        );
    }

    /// Makes the next change set for `name` fail with `reason`.
    pub fn fail_next_change_set(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .change_set_failures
            .insert(name.to_string(), reason.to_string());
    }

    /// Makes describing `name` fail with `error` until cleared.
    pub fn fail_describe(&self, name: &str, error: BackendError) {
        self.state
            .lock()
            .describe_failures
            .insert(name.to_string(), error);
    }

    /// Makes every subsequent call fail with an expired token.
    pub fn expire_credentials(&self) {
        self.state.lock().credentials_expired = true;
    }

    /// Number of describes a new change set stays in `CREATE_IN_PROGRESS`.
    pub fn set_change_set_delay(&self, polls: usize) {
        self.state.lock().change_set_delay = polls;
    }

    /// Number of describes a stack stays in progress after execute or delete.
    pub fn set_in_progress_polls(&self, polls: usize) {
        self.state.lock().in_progress_polls = polls;
    }

    /// Number of events per page returned by `list_stack_events`.
    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().page_size = page_size.max(1);
    }

    /// Returns a stack's current description without advancing it.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<StackDescription> {
        self.state
            .lock()
            .stacks
            .get(name)
            .map(|s| s.description.clone())
    }

    /// Returns every change set request received, oldest first.
    #[must_use]
    pub fn change_set_requests(&self) -> Vec<ChangeSetRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the log of calls as (operation, stack name) pairs.
    #[must_use]
    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.state.lock().calls.clone()
    }

    /// Counts calls to an operation across all stacks.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    /// Counts calls to an operation for one stack.
    #[must_use]
    pub fn call_count_for(&self, operation: &str, stack: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, s)| *op == operation && s == stack)
            .count()
    }
}

/// Builds a fully qualified stack id for a name.
#[must_use]
pub fn stack_arn(name: &str) -> String {
    format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{name}/0f1e2d3c")
}

#[async_trait]
impl StackBackend for InMemoryEngine {
    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(("DescribeStack", stack_name.to_string()));
        state.check_credentials()?;
        if let Some(err) = state.describe_failures.get(stack_name) {
            return Err(err.clone());
        }

        let Some(stack) = state.stacks.get_mut(stack_name) else {
            return Err(BackendError::other(format!(
                "Stack with id {stack_name} does not exist"
            )));
        };
        match stack.pending.pop_front() {
            Some(Transition::Remove) => {
                state.stacks.remove(stack_name);
                return Err(BackendError::not_found(format!("Stack {stack_name}")));
            }
            Some(Transition::Status(status)) => stack.description.status = status,
            None => {}
        }
        Ok(stack.description.clone())
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, BackendError> {
        let mut state = self.state.lock();
        let name = request.stack_name.clone();
        state.calls.push(("CreateChangeSet", name.clone()));
        state.check_credentials()?;
        state.requests.push(request.clone());

        let exists = state.stacks.contains_key(&name);
        match request.change_set_type {
            ChangeSetType::Create => {
                let reviewable = state
                    .stacks
                    .get(&name)
                    .map_or(true, |s| s.description.status == StackStatus::ReviewInProgress);
                if !reviewable {
                    return Err(BackendError::other(format!("Stack [{name}] already exists")));
                }
                if !exists {
                    let mut description = StackDescription::new(&name, StackStatus::ReviewInProgress);
                    description.stack_id = stack_arn(&name);
                    description.creation_time = Some(Utc::now());
                    state.stacks.insert(name.clone(), SimStack::new(description));
                }
            }
            ChangeSetType::Update => {
                if !exists {
                    return Err(BackendError::other(format!("Stack [{name}] does not exist")));
                }
            }
        }

        let (status, reason) = if let Some(reason) = state.change_set_failures.remove(&name) {
            (ChangeSetStatus::Failed, Some(reason))
        } else {
            let unchanged = request.change_set_type == ChangeSetType::Update
                && state.stacks.get(&name).is_some_and(|s| {
                    s.template.as_ref() == Some(&request.template)
                        && s.parameters == request.parameters
                        && s.tags == request.tags
                });
            if unchanged {
                (ChangeSetStatus::Failed, Some(NO_CHANGES_REASON.to_string()))
            } else {
                (ChangeSetStatus::CreateComplete, None)
            }
        };

        let id = format!(
            "arn:aws:cloudformation:us-east-1:123456789012:changeSet/{}/{}",
            request.change_set_name,
            state.next_id()
        );
        let pending_polls = state.change_set_delay;
        state.change_sets.insert(
            id.clone(),
            SimChangeSet {
                request: request.clone(),
                status,
                reason,
                pending_polls,
            },
        );
        Ok(id)
    }

    async fn describe_change_set(
        &self,
        change_set_id: &str,
    ) -> Result<ChangeSetDescription, BackendError> {
        let mut state = self.state.lock();
        let stack = state.stack_for_change_set(change_set_id);
        state.calls.push(("DescribeChangeSet", stack));
        state.check_credentials()?;

        let Some(cs) = state.change_sets.get_mut(change_set_id) else {
            return Err(BackendError::not_found(format!("ChangeSet {change_set_id}")));
        };
        let (status, reason) = if cs.pending_polls > 0 {
            cs.pending_polls -= 1;
            (ChangeSetStatus::CreateInProgress, None)
        } else {
            (cs.status, cs.reason.clone())
        };
        Ok(ChangeSetDescription {
            change_set_id: change_set_id.to_string(),
            stack_name: cs.request.stack_name.clone(),
            change_set_type: cs.request.change_set_type,
            status,
            status_reason: reason,
        })
    }

    async fn delete_change_set(&self, change_set_id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let stack = state.stack_for_change_set(change_set_id);
        state.calls.push(("DeleteChangeSet", stack));
        state.check_credentials()?;

        state
            .change_sets
            .remove(change_set_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found(format!("ChangeSet {change_set_id}")))
    }

    async fn execute_change_set(&self, change_set_id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let stack_name = state.stack_for_change_set(change_set_id);
        state.calls.push(("ExecuteChangeSet", stack_name.clone()));
        state.check_credentials()?;

        let Some(cs) = state.change_sets.remove(change_set_id) else {
            return Err(BackendError::not_found(format!("ChangeSet {change_set_id}")));
        };
        if cs.status != ChangeSetStatus::CreateComplete {
            return Err(BackendError::other(format!(
                "ChangeSet [{change_set_id}] cannot be executed in its current status of [{}]",
                cs.status
            )));
        }

        let change_set_type = cs.request.change_set_type;
        let in_progress = match change_set_type {
            ChangeSetType::Create => StackStatus::CreateInProgress,
            ChangeSetType::Update => StackStatus::UpdateInProgress,
        };
        let failure = state.execute_failures.remove(&stack_name);
        let outputs = state.outputs_on_execute.get(&stack_name).cloned();
        let last = Transition::Status(
            failure
                .as_ref()
                .map_or(change_set_type.success_status(), |f| f.status),
        );
        let pending = state.in_progress_then(in_progress, last);

        let Some(stack) = state.stacks.get_mut(&stack_name) else {
            return Err(BackendError::not_found(format!("Stack {stack_name}")));
        };
        stack.description.status = in_progress;
        stack.pending = pending;
        stack.description.last_updated_time = Some(Utc::now());

        match failure {
            Some(failure) => {
                stack.description.status_reason = Some(failure.reason.clone());
                for event in failure.events {
                    stack.events.insert(0, event);
                }
                let status = failure.status;
                state.record_event(&stack_name, status, Some(failure.reason));
            }
            None => {
                stack.description.status_reason = None;
                stack.template = Some(cs.request.template.clone());
                stack.parameters = cs.request.parameters.clone();
                stack.tags = cs.request.tags.clone();
                stack.description.tags = cs.request.tags.clone();
                if let Some(outputs) = outputs {
                    stack.description.outputs = outputs
                        .into_iter()
                        .map(|(k, v)| StackOutput::new(k, v))
                        .collect();
                }
                state.record_event(&stack_name, change_set_type.success_status(), None);
            }
        }
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(("DeleteStack", stack_name.to_string()));
        state.check_credentials()?;

        let pending = state.in_progress_then(StackStatus::DeleteInProgress, Transition::Remove);
        if let Some(stack) = state.stacks.get_mut(stack_name) {
            stack.description.status = StackStatus::DeleteInProgress;
            stack.pending = pending;
        }
        Ok(())
    }

    async fn list_stack_events(
        &self,
        stack_id: &str,
        next_token: Option<String>,
    ) -> Result<EventPage, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(("ListStackEvents", stack_id.to_string()));
        state.check_credentials()?;

        let page_size = state.page_size;
        let Some(stack) = state.find_stack_mut(stack_id) else {
            return Err(BackendError::not_found(format!("Stack {stack_id}")));
        };
        let offset: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + page_size).min(stack.events.len());
        let events = stack.events.get(offset..end).unwrap_or_default().to_vec();
        let next_token = (end < stack.events.len()).then(|| end.to_string());
        Ok(EventPage { events, next_token })
    }
}
