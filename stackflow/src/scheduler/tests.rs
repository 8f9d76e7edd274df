use super::*;
use crate::core::StackStatus;
use crate::testing::{fast_config, TestHarness};
use pretty_assertions::assert_eq;

const TEMPLATE: &str = r#"{"Resources": {}}"#;

fn stack(name: &str, deps: &[&str]) -> StackDefinition {
    StackDefinition::from_body(name, TEMPLATE).depends_on(deps)
}

fn outputs(pairs: &[(&str, &str)]) -> Outputs {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[tokio::test]
async fn test_one_failure_in_a_batch_does_not_stop_the_others() {
    let h = TestHarness::new();
    h.engine.set_outputs("one", &[("QueueUrl", "q1")]);
    h.engine.set_outputs("three", &[("QueueUrl", "q3")]);
    h.engine.fail_next_execute("two", StackStatus::RollbackComplete, "Bucket already exists");

    let plan = DeploymentPlan::new(vec![stack("one", &[]), stack("two", &[]), stack("three", &[])]).unwrap();
    let report = DeploymentScheduler::new(h.ctx.clone()).deploy(&plan).await.unwrap();

    assert_eq!(report.outputs_of("one"), Some(&outputs(&[("QueueUrl", "q1")])));
    assert_eq!(report.outputs_of("three"), Some(&outputs(&[("QueueUrl", "q3")])));
    assert!(report.outputs_of("two").is_none());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stack, "two");

    match report.into_result().unwrap_err() {
        StackflowError::DeploymentFailed { failures } => {
            let names: Vec<_> = failures.iter().map(|f| f.stack.as_str()).collect();
            assert_eq!(names, vec!["two"]);
            assert!(failures[0].message.contains("ROLLBACK_COMPLETE"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_outputs_flow_to_dependents() {
    let h = TestHarness::new();
    h.engine.set_outputs("base", &[("VpcId", "vpc-1"), ("Stage", "from-base")]);
    h.engine.set_outputs("api", &[("Endpoint", "https://api")]);

    let plan = DeploymentPlan::new(vec![
        stack("base", &[]),
        stack("api", &["base"]).with_parameter("Stage", "prod"),
        stack("web", &["api"]),
    ])
    .unwrap();
    let report = DeploymentScheduler::new(h.ctx.clone()).deploy(&plan).await.unwrap();
    assert!(report.is_success());

    let requests = h.engine.change_set_requests();
    let api = requests.iter().find(|r| r.stack_name == "api").unwrap();
    assert_eq!(api.parameters["VpcId"], "vpc-1");
    assert_eq!(api.parameters["Stage"], "prod");

    let web = requests.iter().find(|r| r.stack_name == "web").unwrap();
    assert_eq!(web.parameters, outputs(&[("Endpoint", "https://api")]));
}

#[tokio::test]
async fn test_dependents_of_failed_stacks_are_skipped() {
    let h = TestHarness::new();
    h.engine.fail_next_change_set("api", "Template format error");

    let plan = DeploymentPlan::new(vec![
        stack("base", &[]),
        stack("api", &["base"]),
        stack("web", &["api"]),
        stack("jobs", &["base"]),
    ])
    .unwrap();
    let report = DeploymentScheduler::new(h.ctx.clone()).deploy(&plan).await.unwrap();

    assert_eq!(report.skipped, vec!["web".to_string()]);
    assert!(report.outputs.contains_key("jobs"));
    assert_eq!(h.engine.call_count_for("CreateChangeSet", "web"), 0);
    assert_eq!(h.events.events_of_type("stack.skipped").len(), 1);

    let progress = h.events.events_of_type("deployment.progress");
    assert_eq!(progress.len(), 4);
    assert_eq!(
        progress.last(),
        Some(&DeployEvent::Progress {
            completed: 4,
            total: 4,
            stack: "web".to_string(),
        })
    );

    let err = report.into_result().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("api"));
    assert!(message.contains("web"));
}

#[tokio::test]
async fn test_progress_is_reported_for_every_stack() {
    let h = TestHarness::new();
    let plan = DeploymentPlan::new(vec![
        stack("base", &[]),
        stack("a", &["base"]),
        stack("b", &["base"]),
        stack("c", &["base"]),
    ])
    .unwrap();
    DeploymentScheduler::new(h.ctx.clone()).deploy(&plan).await.unwrap();

    let progress: Vec<(usize, usize)> = h
        .events
        .events_of_type("deployment.progress")
        .into_iter()
        .filter_map(|e| match e {
            DeployEvent::Progress { completed, total, .. } => Some((completed, total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[tokio::test]
async fn test_redeploy_reports_unchanged_stacks() {
    let h = TestHarness::new();
    h.engine.set_outputs("base", &[("VpcId", "vpc-1")]);
    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();
    let scheduler = DeploymentScheduler::new(h.ctx.clone());

    let first = scheduler.deploy(&plan).await.unwrap();
    let second = scheduler.deploy(&plan).await.unwrap();

    assert_eq!(second.unchanged, vec!["base".to_string(), "api".to_string()]);
    assert_eq!(second.outputs, first.outputs);
    assert_eq!(h.engine.call_count("ExecuteChangeSet"), 2);
}

#[tokio::test]
async fn test_broken_foundation_without_confirmation() {
    let h = TestHarness::new();
    h.engine.insert_stack_with_outputs("base", StackStatus::RollbackComplete, &[]);
    h.engine.insert_stack_with_outputs("api", StackStatus::UpdateComplete, &[]);

    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();
    let err = DeploymentScheduler::new(h.ctx.clone()).deploy(&plan).await.unwrap_err();

    assert!(matches!(err, StackflowError::TeardownRequired { .. }));
    assert_eq!(h.engine.call_count("DeleteStack"), 0);
    assert!(h.engine.stack("api").is_some());
}

#[tokio::test]
async fn test_broken_foundation_with_confirmation_tears_everything_down() {
    let h = TestHarness::with_config(fast_config().with_full_teardown(true));
    h.engine.insert_stack_with_outputs("base", StackStatus::RollbackComplete, &[]);
    h.engine.insert_stack_with_outputs("api", StackStatus::UpdateComplete, &[]);

    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();
    let report = DeploymentScheduler::new(h.ctx.clone()).deploy(&plan).await.unwrap();
    assert!(report.is_success());

    let deletes: Vec<String> = h
        .engine
        .calls()
        .into_iter()
        .filter(|(op, _)| *op == "DeleteStack")
        .map(|(_, stack)| stack)
        .collect();
    assert_eq!(deletes, vec!["api".to_string(), "base".to_string()]);

    let types: Vec<_> = h
        .engine
        .change_set_requests()
        .into_iter()
        .map(|r| (r.stack_name, r.change_set_type))
        .collect();
    assert_eq!(
        types,
        vec![
            ("base".to_string(), crate::core::ChangeSetType::Create),
            ("api".to_string(), crate::core::ChangeSetType::Create),
        ]
    );
}

#[tokio::test]
async fn test_teardown_skips_missing_stacks() {
    let h = TestHarness::new();
    h.engine.insert_stack_with_outputs("base", StackStatus::CreateComplete, &[]);

    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();
    DeploymentScheduler::new(h.ctx.clone()).teardown(&plan).await.unwrap();

    assert_eq!(h.engine.call_count_for("DeleteStack", "api"), 0);
    assert_eq!(h.engine.call_count_for("DeleteStack", "base"), 1);
    assert!(h.engine.stack("base").is_none());
}

#[tokio::test]
async fn test_single_stack_uses_fresh_outputs() {
    let h = TestHarness::new();
    h.engine
        .insert_stack_with_outputs("base", StackStatus::UpdateComplete, &[("VpcId", "vpc-live")]);
    h.engine
        .insert_stack_with_outputs("api", StackStatus::CreateComplete, &[("Endpoint", "https://api")]);

    let plan = DeploymentPlan::new(vec![
        stack("base", &[]),
        stack("api", &["base"]),
        stack("web", &["api"]),
    ])
    .unwrap();
    let outcome = DeploymentScheduler::new(h.ctx.clone())
        .deploy_single(&plan, "web")
        .await
        .unwrap();
    assert_eq!(outcome.stack_name, "web");

    let requests = h.engine.change_set_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].parameters, outputs(&[("Endpoint", "https://api")]));
    assert_eq!(h.engine.call_count_for("CreateChangeSet", "base"), 0);
}

#[tokio::test]
async fn test_single_stack_refuses_without_bootstrap() {
    let h = TestHarness::new();
    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();

    let err = DeploymentScheduler::new(h.ctx.clone())
        .deploy_single(&plan, "api")
        .await
        .unwrap_err();
    match err {
        StackflowError::NotBootstrapped { stack, missing } => {
            assert_eq!(stack, "api");
            assert_eq!(missing, "base");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.engine.call_count("CreateChangeSet"), 0);
}

#[tokio::test]
async fn test_single_stack_refuses_to_bootstrap_the_foundation() {
    let h = TestHarness::new();
    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();

    let err = DeploymentScheduler::new(h.ctx.clone())
        .deploy_single(&plan, "base")
        .await
        .unwrap_err();
    match err {
        StackflowError::NotBootstrapped { stack, missing } => {
            assert_eq!(stack, "base");
            assert_eq!(missing, "base");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.engine.call_count("CreateChangeSet"), 0);
}

#[tokio::test]
async fn test_single_stack_updates_a_deployed_foundation() {
    let h = TestHarness::new();
    h.engine
        .insert_stack_with_outputs("base", StackStatus::UpdateComplete, &[("VpcId", "vpc-1")]);
    let plan = DeploymentPlan::new(vec![stack("base", &[]), stack("api", &["base"])]).unwrap();

    DeploymentScheduler::new(h.ctx.clone())
        .deploy_single(&plan, "base")
        .await
        .unwrap();

    let requests = h.engine.change_set_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].change_set_type, crate::core::ChangeSetType::Update);
}

#[tokio::test]
async fn test_single_stack_must_be_in_the_plan() {
    let h = TestHarness::new();
    let plan = DeploymentPlan::new(vec![stack("base", &[])]).unwrap();

    let err = DeploymentScheduler::new(h.ctx.clone())
        .deploy_single(&plan, "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, StackflowError::Validation(_)));
}

#[tokio::test]
async fn test_fetch_outputs_ignores_unsettled_stacks() {
    let h = TestHarness::new();
    h.engine
        .insert_stack_with_outputs("ready", StackStatus::UpdateComplete, &[("Key", "value")]);
    h.engine
        .insert_stack_with_outputs("busy", StackStatus::UpdateInProgress, &[("Key", "stale")]);
    h.engine
        .insert_stack_with_outputs("broken", StackStatus::RollbackComplete, &[("Key", "stale")]);

    let outputs = DeploymentScheduler::new(h.ctx.clone())
        .fetch_outputs(&["ready", "busy", "broken", "missing"])
        .await
        .unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs["ready"]["Key"], "value");
}

#[tokio::test]
async fn test_parallelism_of_one_still_deploys_everything() {
    let h = TestHarness::with_config(fast_config().with_max_parallel(1));
    let plan = DeploymentPlan::new((0..5).map(|i| stack(&format!("s{i}"), &[])).collect()).unwrap();

    let outputs = DeploymentScheduler::new(h.ctx.clone())
        .deploy(&plan)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(outputs.len(), 5);
}
