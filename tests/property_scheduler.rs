// tests/property_scheduler.rs
//
// Random DAGs driven to completion with random completion orders.

use std::collections::BTreeSet;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use ngsflow::dag::{JobGraph, JobOutcome, JobOutput, JobStatus, RunResult, ScheduledJob, Scheduler};
use ngsflow::errors::JobError;
use ngsflow_test_utils::builders::{ok_job, options};

const MAX_JOBS: usize = 12;
const BUDGET_CORES: u32 = 4;

#[derive(Debug, Clone)]
struct Case {
    jobs: usize,
    edges: Vec<(usize, usize)>,
    cores: Vec<u32>,
    failing: Vec<bool>,
}

fn case() -> impl Strategy<Value = Case> {
    (
        1..=MAX_JOBS,
        prop::collection::vec((0..MAX_JOBS, 0..MAX_JOBS), 0..30),
        prop::collection::vec(1..=BUDGET_CORES, MAX_JOBS),
        prop::collection::vec(prop::bool::weighted(0.2), MAX_JOBS),
    )
        .prop_map(|(jobs, edges, cores, failing)| Case {
            jobs,
            // Only forward edges, so the graph is acyclic.
            edges: edges
                .into_iter()
                .filter(|&(a, b)| a < b && b < jobs)
                .collect(),
            cores,
            failing,
        })
}

fn build(case: &Case) -> JobGraph {
    let mut graph = JobGraph::new();
    let handles: Vec<_> = (0..case.jobs)
        .map(|i| graph.add_job(ok_job(&format!("j{i}")).cores(case.cores[i])))
        .collect();
    for &(a, b) in &case.edges {
        graph
            .add_child(handles[a], handles[b])
            .expect("forward edges never form a cycle");
    }
    graph
}

/// Runs the scheduler to the end, completing a running job chosen by
/// `picks` at every step (first-in first-out when `picks` is empty).
fn drive(case: &Case, picks: &[usize]) -> Result<RunResult, TestCaseError> {
    let mut scheduler = Scheduler::new(build(case), options(BUDGET_CORES, 4))
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let max_workers = scheduler.options().max_workers;

    let mut running: Vec<ScheduledJob> = Vec::new();
    let mut next = scheduler.start().newly_scheduled;
    let mut steps = 0usize;

    loop {
        for job in &next {
            for pre in scheduler.graph().prerequisites_of(job.handle) {
                prop_assert_eq!(
                    scheduler.status_of(pre),
                    Some(JobStatus::Succeeded),
                    "{} dispatched before its prerequisite {}",
                    job.label,
                    scheduler.graph().label(pre)
                );
            }
        }
        running.append(&mut next);

        prop_assert!(scheduler.in_use().cores <= BUDGET_CORES);
        prop_assert!(scheduler.running_count() <= max_workers);
        prop_assert_eq!(scheduler.running_count(), running.len());

        if running.is_empty() {
            break;
        }
        let index = match picks.get(steps % picks.len().max(1)) {
            Some(p) => p % running.len(),
            None => 0,
        };
        let job = running.remove(index);
        let outcome = if case.failing[job.handle.index()] {
            JobOutcome::Failed(JobError::failed("boom"))
        } else {
            JobOutcome::Success(JobOutput::value(job.label.clone()))
        };
        next = scheduler
            .step_completion(job.handle, job.attempt, outcome)
            .newly_scheduled;

        steps += 1;
        prop_assert!(steps <= 4 * MAX_JOBS, "run did not converge");
    }

    prop_assert!(scheduler.is_finished());
    Ok(scheduler.run_result())
}

fn labels(reports: &[ngsflow::dag::JobReport]) -> BTreeSet<String> {
    reports.iter().map(|r| r.label.clone()).collect()
}

/// A job succeeds when it and all of its ancestors are healthy; it fails
/// when it is the first failing job on its paths; anything else is skipped.
fn expected(case: &Case) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
    let mut ok = vec![true; case.jobs];
    let (mut succeeded, mut failed, mut skipped) =
        (BTreeSet::new(), BTreeSet::new(), BTreeSet::new());
    for j in 0..case.jobs {
        let upstream_ok = case
            .edges
            .iter()
            .filter(|&&(_, b)| b == j)
            .all(|&(a, _)| ok[a]);
        let label = format!("j{j}");
        if !upstream_ok {
            ok[j] = false;
            skipped.insert(label);
        } else if case.failing[j] {
            ok[j] = false;
            failed.insert(label);
        } else {
            succeeded.insert(label);
        }
    }
    (succeeded, failed, skipped)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn outcome_is_independent_of_completion_order(
        case in case(),
        picks in prop::collection::vec(any::<usize>(), 1..64),
    ) {
        let fifo = drive(&case, &[])?;
        let shuffled = drive(&case, &picks)?;
        let (succeeded, failed, skipped) = expected(&case);

        for result in [&fifo, &shuffled] {
            prop_assert_eq!(&labels(&result.succeeded), &succeeded);
            prop_assert_eq!(&labels(&result.failed), &failed);
            prop_assert_eq!(&labels(&result.skipped), &skipped);
            prop_assert!(result.unfinished.is_empty());
            prop_assert_eq!(result.dispatches, succeeded.len() + failed.len());
            prop_assert!(result.peak_usage.cores <= BUDGET_CORES);
        }
    }
}
