// tests/scheduler_steps.rs
//
// Drives the scheduler by hand: every completion is fed in explicitly, so
// the tests can assert on exactly what each step dispatches.

use std::collections::BTreeMap;
use std::error::Error;

use serde_json::json;

use ngsflow::checkpoint::CheckpointEntry;
use ngsflow::dag::{
    FailureKind, JobGraph, JobOutcome, JobOutput, JobStatus, RunStatus, ScheduledJob, Scheduler,
    SchedulerStep,
};
use ngsflow::errors::JobError;
use ngsflow::types::{Resources, RetryPolicy};
use ngsflow_test_utils::builders::{concat_job, ok_job, options};
use ngsflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn labels(jobs: &[ScheduledJob]) -> Vec<&str> {
    jobs.iter().map(|j| j.label.as_str()).collect()
}

fn find<'a>(jobs: &'a [ScheduledJob], label: &str) -> &'a ScheduledJob {
    jobs.iter()
        .find(|j| j.label == label)
        .unwrap_or_else(|| panic!("{label} was not dispatched"))
}

fn succeed(scheduler: &mut Scheduler, job: &ScheduledJob) -> SchedulerStep {
    scheduler.step_completion(
        job.handle,
        job.attempt,
        JobOutcome::Success(JobOutput::value(job.label.clone())),
    )
}

fn fail(scheduler: &mut Scheduler, job: &ScheduledJob) -> SchedulerStep {
    scheduler.step_completion(
        job.handle,
        job.attempt,
        JobOutcome::Failed(JobError::failed("boom")),
    )
}

#[test]
fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();

    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));
    let b = graph.add_job(ok_job("b"));
    graph.add_child(a, b)?;

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["a"]);
    assert_eq!(scheduler.status_of(b), Some(JobStatus::Pending));
    assert_eq!(scheduler.deps_satisfied(b), Some(false));

    let step = succeed(&mut scheduler, &start.newly_scheduled[0]);
    assert_eq!(step.newly_succeeded, vec![a]);
    assert_eq!(labels(&step.newly_scheduled), vec!["b"]);

    let step = succeed(&mut scheduler, &step.newly_scheduled[0]);
    assert!(step.run_just_finished);
    assert!(scheduler.is_finished());

    let result = scheduler.run_result();
    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.dispatches, 2);
    assert_eq!(result.exit_code(), 0);
    Ok(())
}

#[test]
fn failure_skips_dependents_but_not_siblings() -> TestResult {
    init_tracing();

    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));
    let b = graph.add_job(ok_job("b"));
    let c = graph.add_job(ok_job("c"));
    let d = graph.add_job(ok_job("d"));
    graph.add_child(a, b)?;
    graph.add_child(b, c)?;

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["a", "d"]);

    let step = fail(&mut scheduler, find(&start.newly_scheduled, "a"));
    assert_eq!(step.newly_failed.len(), 3);
    assert!(step.newly_scheduled.is_empty());

    assert!(matches!(
        scheduler.failure_of(a),
        Some(FailureKind::Execution(JobError::Failed(_)))
    ));
    for skipped in [b, c] {
        assert_eq!(
            scheduler.failure_of(skipped),
            Some(&FailureKind::DependencyFailure {
                upstream: "a".to_string()
            })
        );
    }

    succeed(&mut scheduler, find(&start.newly_scheduled, "d"));
    assert_eq!(scheduler.status_of(d), Some(JobStatus::Succeeded));

    let result = scheduler.run_result();
    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failed_jobs(), vec!["a", "b", "c"]);
    assert_eq!(result.skipped.len(), 2);
    Ok(())
}

#[test]
fn follow_on_waits_for_both_children() -> TestResult {
    init_tracing();

    let mut graph = JobGraph::new();
    let root = graph.add_job(ok_job("root"));
    let c1 = graph.add_job(ok_job("c1"));
    let c2 = graph.add_job(ok_job("c2"));
    let merge = graph.add_job(ok_job("merge"));
    graph.add_child(root, c1)?;
    graph.add_child(root, c2)?;
    graph.add_follow_on(root, merge)?;

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["root"]);

    let children = succeed(&mut scheduler, &start.newly_scheduled[0]).newly_scheduled;
    assert_eq!(labels(&children), vec!["c1", "c2"]);
    assert_eq!(scheduler.status_of(merge), Some(JobStatus::Pending));

    let step = succeed(&mut scheduler, find(&children, "c1"));
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(scheduler.status_of(merge), Some(JobStatus::Pending));

    let step = succeed(&mut scheduler, find(&children, "c2"));
    assert_eq!(labels(&step.newly_scheduled), vec!["merge"]);
    Ok(())
}

#[test]
fn follow_on_is_skipped_when_a_child_fails() -> TestResult {
    let mut graph = JobGraph::new();
    let root = graph.add_job(ok_job("root"));
    let c1 = graph.add_job(ok_job("c1"));
    let c2 = graph.add_job(ok_job("c2"));
    let merge = graph.add_job(ok_job("merge"));
    graph.add_child(root, c1)?;
    graph.add_child(root, c2)?;
    graph.add_follow_on(root, merge)?;

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let start = scheduler.start();
    let children = succeed(&mut scheduler, &start.newly_scheduled[0]).newly_scheduled;

    fail(&mut scheduler, find(&children, "c2"));
    assert_eq!(
        scheduler.failure_of(merge),
        Some(&FailureKind::DependencyFailure {
            upstream: "c2".to_string()
        })
    );

    let step = succeed(&mut scheduler, find(&children, "c1"));
    assert!(step.newly_scheduled.is_empty());
    assert!(step.run_just_finished);
    Ok(())
}

#[test]
fn best_fit_dispatch_respects_core_budget() -> TestResult {
    init_tracing();

    let mut graph = JobGraph::new();
    graph.add_job(ok_job("small-a").cores(2));
    graph.add_job(ok_job("big").cores(3));
    graph.add_job(ok_job("small-b").cores(2));

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["big"]);
    assert_eq!(scheduler.in_use().cores, 3);

    let step = succeed(&mut scheduler, &start.newly_scheduled[0]);
    assert_eq!(labels(&step.newly_scheduled), vec!["small-a", "small-b"]);
    assert_eq!(scheduler.in_use().cores, 4);

    for job in &step.newly_scheduled {
        succeed(&mut scheduler, job);
    }
    let result = scheduler.run_result();
    assert!(result.is_success());
    assert_eq!(result.peak_usage.cores, 4);
    assert_eq!(scheduler.in_use(), Resources::default());
    Ok(())
}

#[test]
fn memory_is_accounted_independently_of_cores() -> TestResult {
    let gib = 1024 * 1024 * 1024;
    let mut graph = JobGraph::new();
    graph.add_job(ok_job("a").memory(3 * gib));
    graph.add_job(ok_job("b").memory(3 * gib));

    let mut scheduler = Scheduler::new(graph, options(8, 4))?;
    let start = scheduler.start();
    assert_eq!(start.newly_scheduled.len(), 1);
    assert_eq!(scheduler.in_use().memory, 3 * gib);

    let step = succeed(&mut scheduler, &start.newly_scheduled[0]);
    assert_eq!(step.newly_scheduled.len(), 1);
    Ok(())
}

#[test]
fn job_larger_than_budget_fails_with_resource_exhaustion() -> TestResult {
    let mut graph = JobGraph::new();
    let huge = graph.add_job(ok_job("huge").cores(8));
    let after = graph.add_job(ok_job("after"));
    let fine = graph.add_job(ok_job("fine"));
    graph.add_child(huge, after)?;

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["fine"]);

    assert_eq!(
        scheduler.failure_of(huge),
        Some(&FailureKind::ResourceExhaustion {
            requested: Resources::new(8, 0),
            budget: Resources::gib(4, 4),
        })
    );
    assert!(matches!(
        scheduler.failure_of(after),
        Some(FailureKind::DependencyFailure { .. })
    ));
    assert_eq!(scheduler.status_of(fine), Some(JobStatus::Running));
    Ok(())
}

#[test]
fn worker_bound_limits_concurrency() -> TestResult {
    let mut graph = JobGraph::new();
    for i in 0..4 {
        graph.add_job(ok_job(&format!("job-{i}")));
    }

    let mut scheduler = Scheduler::new(graph, options(8, 8).max_workers(2))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["job-0", "job-1"]);
    assert_eq!(scheduler.running_count(), 2);

    let step = succeed(&mut scheduler, &start.newly_scheduled[0]);
    assert_eq!(labels(&step.newly_scheduled), vec!["job-2"]);
    assert_eq!(scheduler.running_count(), 2);
    Ok(())
}

#[test]
fn failed_attempt_is_retried_up_to_max_attempts() -> TestResult {
    init_tracing();

    let mut graph = JobGraph::new();
    let flaky = graph.add_job(ok_job("flaky"));

    let mut scheduler = Scheduler::new(graph, options(4, 4).max_attempts(3))?;
    let mut job = scheduler.start().newly_scheduled.remove(0);
    assert_eq!(job.attempt, 1);

    for expected_attempt in [2, 3] {
        let step = fail(&mut scheduler, &job);
        assert_eq!(step.retried, vec![flaky]);
        job = step.newly_scheduled[0].clone();
        assert_eq!(job.attempt, expected_attempt);
    }

    let step = succeed(&mut scheduler, &job);
    assert_eq!(step.newly_succeeded, vec![flaky]);
    assert_eq!(scheduler.attempts_of(flaky), Some(3));
    assert_eq!(scheduler.run_result().dispatches, 3);
    Ok(())
}

#[test]
fn retries_are_exhausted_then_job_fails() -> TestResult {
    let mut graph = JobGraph::new();
    let job = graph.add_job(ok_job("always-fails"));

    let mut scheduler = Scheduler::new(graph, options(4, 4).max_attempts(2))?;
    let first = scheduler.start().newly_scheduled.remove(0);
    let second = fail(&mut scheduler, &first).newly_scheduled.remove(0);
    let step = fail(&mut scheduler, &second);

    assert!(step.retried.is_empty());
    assert_eq!(step.newly_failed, vec![job]);
    assert_eq!(
        scheduler.failure_of(job),
        Some(&FailureKind::Execution(JobError::failed("boom")))
    );
    let report = scheduler.run_result();
    assert_eq!(report.report("always-fails").map(|r| r.attempts), Some(2));
    Ok(())
}

#[test]
fn per_group_policy_shares_retries_within_a_group() -> TestResult {
    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("caller-a").retry_group(Some("lib1.callers".into())));
    let b = graph.add_job(ok_job("caller-b").retry_group(Some("lib1.callers".into())));
    let loner = graph.add_job(ok_job("loner"));

    let opts = options(4, 4)
        .max_attempts(2)
        .retry_policy(RetryPolicy::PerGroup);
    let mut scheduler = Scheduler::new(graph, opts)?;
    let start = scheduler.start();
    assert_eq!(start.newly_scheduled.len(), 3);

    let step = fail(&mut scheduler, find(&start.newly_scheduled, "caller-a"));
    assert_eq!(step.retried, vec![a]);

    // The group's single retry is used up.
    let step = fail(&mut scheduler, find(&start.newly_scheduled, "caller-b"));
    assert!(step.retried.is_empty());
    assert_eq!(scheduler.status_of(b), Some(JobStatus::Failed));

    // Jobs without a group still get their own retry.
    let step = fail(&mut scheduler, find(&start.newly_scheduled, "loner"));
    assert_eq!(step.retried, vec![loner]);
    Ok(())
}

#[test]
fn stale_completion_is_ignored() -> TestResult {
    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));

    let mut scheduler = Scheduler::new(graph, options(4, 4).max_attempts(2))?;
    let first = scheduler.start().newly_scheduled.remove(0);
    let second = fail(&mut scheduler, &first).newly_scheduled.remove(0);

    // A late report for attempt 1 must not complete attempt 2.
    let step = succeed(&mut scheduler, &first);
    assert!(step.newly_succeeded.is_empty());
    assert_eq!(scheduler.status_of(a), Some(JobStatus::Running));
    assert_eq!(scheduler.running_count(), 1);

    succeed(&mut scheduler, &second);
    assert_eq!(scheduler.status_of(a), Some(JobStatus::Succeeded));
    Ok(())
}

#[test]
fn promise_values_flow_into_dispatched_inputs() -> TestResult {
    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));
    let b = graph.add_job(concat_job("b").input(graph.promise::<String>(a)));

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let job_a = scheduler.start().newly_scheduled.remove(0);
    let step = scheduler.step_completion(
        job_a.handle,
        job_a.attempt,
        JobOutcome::Success(JobOutput::value(json!({"bam": "a.bam"}))),
    );

    assert_eq!(scheduler.result_of(a), Some(&json!({"bam": "a.bam"})));
    let job_b = find(&step.newly_scheduled, "b");
    assert_eq!(job_b.handle, b);
    assert_eq!(job_b.inputs, vec![json!({"bam": "a.bam"})]);
    Ok(())
}

#[test]
fn spawned_subgraph_joins_before_follow_on_runs() -> TestResult {
    init_tracing();

    let mut graph = JobGraph::new();
    let spawner = graph.add_job(ok_job("spawner"));
    let after = graph.add_job(ok_job("after"));
    graph.add_follow_on(spawner, after)?;

    let mut sub = JobGraph::new();
    let x = sub.add_job(ok_job("x"));
    sub.add_job(concat_job("y").input(sub.promise::<String>(x)));

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let job = scheduler.start().newly_scheduled.remove(0);
    let step = scheduler.step_completion(
        job.handle,
        job.attempt,
        JobOutcome::Success(JobOutput::spawn(sub)),
    );

    assert_eq!(step.spawned.len(), 2);
    assert_eq!(scheduler.status_of(spawner), Some(JobStatus::Joining));
    assert_eq!(labels(&step.newly_scheduled), vec!["x"]);

    let step = succeed(&mut scheduler, &step.newly_scheduled[0]);
    let job_y = find(&step.newly_scheduled, "y");
    assert_eq!(job_y.inputs, vec![json!("x")]);
    assert_eq!(scheduler.status_of(after), Some(JobStatus::Pending));

    let step = succeed(&mut scheduler, job_y);
    assert!(step.newly_succeeded.contains(&spawner));
    assert_eq!(labels(&step.newly_scheduled), vec!["after"]);
    Ok(())
}

#[test]
fn failing_spawned_job_fails_its_spawner() -> TestResult {
    let mut graph = JobGraph::new();
    let spawner = graph.add_job(ok_job("spawner"));
    let after = graph.add_job(ok_job("after"));
    graph.add_follow_on(spawner, after)?;

    let mut sub = JobGraph::new();
    sub.add_job(ok_job("x"));

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let job = scheduler.start().newly_scheduled.remove(0);
    let step = scheduler.step_completion(
        job.handle,
        job.attempt,
        JobOutcome::Success(JobOutput::spawn(sub)),
    );

    let step = fail(&mut scheduler, &step.newly_scheduled[0]);
    assert!(step.run_just_finished);
    assert_eq!(
        scheduler.failure_of(spawner),
        Some(&FailureKind::SpawnedSubtree {
            failed: "x".to_string()
        })
    );
    assert!(matches!(
        scheduler.failure_of(after),
        Some(FailureKind::DependencyFailure { .. })
    ));
    Ok(())
}

#[test]
fn spawn_with_clashing_label_fails_the_spawner() -> TestResult {
    let mut graph = JobGraph::new();
    let spawner = graph.add_job(ok_job("spawner"));

    let mut sub = JobGraph::new();
    sub.add_job(ok_job("spawner"));

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    let job = scheduler.start().newly_scheduled.remove(0);
    scheduler.step_completion(
        job.handle,
        job.attempt,
        JobOutcome::Success(JobOutput::spawn(sub)),
    );

    assert!(matches!(
        scheduler.failure_of(spawner),
        Some(FailureKind::Execution(JobError::Spawn(_)))
    ));
    Ok(())
}

#[test]
fn cancel_pending_skips_unstarted_jobs_and_stops_retries() -> TestResult {
    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));
    let b = graph.add_job(ok_job("b"));
    let c = graph.add_job(ok_job("c"));
    graph.add_child(a, b)?;

    let mut scheduler = Scheduler::new(graph, options(4, 4).max_attempts(3))?;
    let start = scheduler.start();
    assert_eq!(labels(&start.newly_scheduled), vec!["a", "c"]);

    let step = scheduler.cancel_pending();
    assert_eq!(step.newly_failed, vec![b]);
    assert!(scheduler.is_draining());
    assert_eq!(scheduler.failure_of(b), Some(&FailureKind::Cancelled));

    let step = fail(&mut scheduler, find(&start.newly_scheduled, "a"));
    assert!(step.retried.is_empty());
    assert!(step.newly_scheduled.is_empty());

    let step = succeed(&mut scheduler, find(&start.newly_scheduled, "c"));
    assert!(step.run_just_finished);
    assert_eq!(scheduler.status_of(c), Some(JobStatus::Succeeded));
    assert_eq!(scheduler.status_of(a), Some(JobStatus::Failed));

    let result = scheduler.run_result();
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.failed.len(), 1);
    Ok(())
}

#[test]
fn restore_from_checkpoint_skips_matching_jobs() -> TestResult {
    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));
    let b = graph.add_job(concat_job("b").input(graph.promise::<String>(a)));

    let mut entries = BTreeMap::new();
    entries.insert(
        "a".to_string(),
        CheckpointEntry {
            fingerprint: graph.fingerprint(a),
            value: json!("restored-a"),
        },
    );

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    assert_eq!(scheduler.restore_from(entries)?, 1);
    assert_eq!(scheduler.status_of(a), Some(JobStatus::Succeeded));
    assert_eq!(scheduler.checkpoint_entry(a), None);

    let start = scheduler.start();
    let job_b = find(&start.newly_scheduled, "b");
    assert_eq!(job_b.inputs, vec![json!("restored-a")]);

    succeed(&mut scheduler, job_b);
    assert!(scheduler.checkpoint_entry(b).is_some());

    let result = scheduler.run_result();
    assert!(result.is_success());
    assert_eq!(result.dispatches, 1);
    assert!(result.report("a").map(|r| r.restored).unwrap_or(false));
    Ok(())
}

#[test]
fn stale_checkpoint_entry_is_not_restored() -> TestResult {
    let mut graph = JobGraph::new();
    let a = graph.add_job(ok_job("a"));

    let mut entries = BTreeMap::new();
    entries.insert(
        "a".to_string(),
        CheckpointEntry {
            fingerprint: "from-an-older-pipeline".to_string(),
            value: json!(null),
        },
    );

    let mut scheduler = Scheduler::new(graph, options(4, 4))?;
    assert_eq!(scheduler.restore_from(entries)?, 0);
    assert_eq!(scheduler.status_of(a), Some(JobStatus::Pending));
    assert_eq!(labels(&scheduler.start().newly_scheduled), vec!["a"]);
    Ok(())
}

#[test]
fn restore_covers_follow_ons_of_a_finished_spawner() -> TestResult {
    init_tracing();

    let build = || -> Result<JobGraph, Box<dyn Error>> {
        let mut graph = JobGraph::new();
        let spawner = graph.add_job(ok_job("spawner"));
        let merge = graph.add_job(ok_job("merge"));
        let annotate = graph.add_job(concat_job("annotate").input(graph.promise::<String>(merge)));
        graph.add_follow_on(spawner, merge)?;
        graph.add_child(merge, annotate)?;
        Ok(graph)
    };

    // First run: spawner -> part, then merge -> annotate.
    let mut scheduler = Scheduler::new(build()?, options(4, 4))?;
    let mut entries = BTreeMap::new();
    let mut record = |scheduler: &Scheduler, step: &SchedulerStep| {
        for &h in &step.newly_succeeded {
            if let Some(entry) = scheduler.checkpoint_entry(h) {
                entries.insert(scheduler.graph().label(h).to_string(), entry);
            }
        }
    };

    let job = scheduler.start().newly_scheduled.remove(0);
    let mut sub = JobGraph::new();
    sub.add_job(ok_job("part"));
    let step = scheduler.step_completion(job.handle, job.attempt, JobOutcome::Success(JobOutput::spawn(sub)));
    let mut queue = step.newly_scheduled;
    while let Some(job) = queue.pop() {
        let step = succeed(&mut scheduler, &job);
        record(&scheduler, &step);
        queue.extend(step.newly_scheduled);
    }
    assert!(scheduler.run_result().is_success());
    assert_eq!(entries.len(), 4);

    // Second run: nothing left to do.
    let mut scheduler = Scheduler::new(build()?, options(4, 4))?;
    assert_eq!(scheduler.restore_from(entries)?, 3);
    assert!(scheduler.start().newly_scheduled.is_empty());
    assert!(scheduler.is_finished());

    let result = scheduler.run_result();
    assert!(result.is_success());
    assert_eq!(result.dispatches, 0);
    assert!(result.succeeded.iter().all(|r| r.restored));
    Ok(())
}

#[test]
fn invalid_options_are_rejected() {
    let graph = JobGraph::new();
    assert!(Scheduler::new(graph.clone(), options(4, 4).max_workers(0)).is_err());
    assert!(Scheduler::new(graph.clone(), options(4, 4).max_attempts(0)).is_err());
    assert!(Scheduler::new(graph, options(0, 4)).is_err());
}

#[test]
fn empty_graph_finishes_immediately() -> TestResult {
    let mut scheduler = Scheduler::new(JobGraph::new(), options(1, 1))?;
    let step = scheduler.start();
    assert!(step.run_just_finished);
    assert!(scheduler.run_result().is_success());
    Ok(())
}
