//! The per-task execution state machine
//!
//! Planning → Gate → Executing → Reviewing → Scanning → Verifying →
//! (Done | Retry | Escalated). Every state entry is timed into a step
//! metric; attempt indices appear in step names. The outcome is recorded on
//! every terminal path; the learner and tactical-groom children are spawned
//! only after a successful definition-of-done run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::eyre;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::runtime::{
    ActivityContext, RetryPolicy, SIGNAL_HUMAN_APPROVAL, SignalHub, with_retries,
};

use super::activities::{ExecActivities, FanOut};
use super::outcome::{
    ActivityTokens, OutcomeRecord, OutcomeStatus, StepMetric, StepStatus, StepTimer,
};
use super::plan::StructuredPlan;
use super::{
    DOD_TIMEOUT, ESCALATE_TIMEOUT, EXECUTE_TIMEOUT, MAX_DOD_RETRIES, MAX_HANDOFFS, PLAN_ATTEMPTS,
    PLAN_TIMEOUT, RECORD_TIMEOUT, REVIEW_TIMEOUT, SCAN_TIMEOUT, TaskRequest,
};

/// One run of the execution workflow for a single task
pub struct TaskExecution {
    req: TaskRequest,
    activities: Arc<dyn ExecActivities>,
    signals: Arc<dyn SignalHub>,
    fanout: Arc<dyn FanOut>,
}

impl TaskExecution {
    pub fn new(
        req: TaskRequest,
        activities: Arc<dyn ExecActivities>,
        signals: Arc<dyn SignalHub>,
        fanout: Arc<dyn FanOut>,
    ) -> Self {
        Self {
            req,
            activities,
            signals,
            fanout,
        }
    }

    /// Drive the state machine to a terminal state
    pub async fn run(self) -> eyre::Result<OutcomeRecord> {
        let started = Instant::now();
        // An unset threshold defaults here too, so directly-constructed
        // requests behave like dispatched ones.
        let threshold = if self.req.slow_step_threshold.is_zero() {
            super::outcome::DEFAULT_SLOW_STEP_THRESHOLD
        } else {
            self.req.slow_step_threshold
        };
        let (ctx, _cancel) = ActivityContext::new();
        let mut steps: Vec<StepMetric> = Vec::new();

        info!(task_id = %self.req.task_id, project = %self.req.project, auto_approve = self.req.auto_approve, "Execution workflow started");

        // Planning
        let timer = StepTimer::start("plan");
        let mut plan = match self.obtain_plan(&ctx).await {
            Ok(plan) => {
                steps.push(timer.finish(StepStatus::Ok, threshold));
                plan
            }
            Err(e) => {
                steps.push(timer.finish(StepStatus::Failed, threshold));
                return Err(e.wrap_err("planning failed"));
            }
        };
        if let Err(reason) = plan.validate() {
            return Err(eyre!("plan validation failed: {reason}"));
        }
        let plan_baseline = ActivityTokens {
            activity: "plan".to_string(),
            tokens: plan.tokens,
        };

        // Gate
        let timer = StepTimer::start("gate");
        if self.req.auto_approve {
            steps.push(timer.finish(StepStatus::Skipped, threshold));
        } else {
            let value = self
                .signals
                .wait(&self.req.task_id, SIGNAL_HUMAN_APPROVAL)
                .await?;
            if value == crate::runtime::APPROVAL_REJECTED {
                steps.push(timer.finish(StepStatus::Failed, threshold));
                let outcome = self.build_outcome(
                    OutcomeStatus::Rejected,
                    1,
                    started,
                    false,
                    String::new(),
                    0,
                    vec![plan_baseline],
                    steps,
                );
                self.record(&outcome).await;
                return Err(eyre!("plan for task {} rejected at the human gate", self.req.task_id));
            }
            debug!(task_id = %self.req.task_id, %value, "Gate approved");
            steps.push(timer.finish(StepStatus::Ok, threshold));
        }

        // Execute / review / scan / verify with retries
        let mut handoffs: u32 = 0;
        let mut attempt_tokens: Vec<ActivityTokens> = Vec::new();
        let mut last_failure = String::new();

        for attempt in 1..=MAX_DOD_RETRIES {
            // Token accounting restarts from the plan baseline each attempt,
            // so the recorded outcome reflects only the final attempt.
            attempt_tokens = vec![plan_baseline.clone()];
            let mut implementer = self.req.provider.clone();
            let mut reviewer = self.req.reviewer.clone();

            // Executing
            let timer = StepTimer::start(format!("execute[{attempt}]"));
            let mut exec_result = match timeout(
                EXECUTE_TIMEOUT,
                self.activities.execute(&ctx, &self.req, &plan, &implementer),
            )
            .await
            {
                Ok(Ok(result)) => {
                    attempt_tokens.push(ActivityTokens {
                        activity: "execute".to_string(),
                        tokens: result.tokens,
                    });
                    steps.push(timer.finish(StepStatus::Ok, threshold));
                    result
                }
                Ok(Err(e)) => {
                    steps.push(timer.finish(StepStatus::Failed, threshold));
                    last_failure = format!("execute attempt {attempt} failed: {e}");
                    plan.record_error(last_failure.clone());
                    continue;
                }
                Err(_) => {
                    steps.push(timer.finish(StepStatus::Failed, threshold));
                    last_failure = format!("execute attempt {attempt} timed out");
                    plan.record_error(last_failure.clone());
                    continue;
                }
            };

            // Reviewing, with cross-agent handoff on rejection
            let mut attempt_failed = false;
            for _cycle in 0..MAX_HANDOFFS {
                let timer = StepTimer::start(format!("review[{attempt}]"));
                let review = match timeout(
                    REVIEW_TIMEOUT,
                    self.activities
                        .review(&ctx, &self.req, &plan, &exec_result, &reviewer),
                )
                .await
                {
                    Ok(Ok(review)) => review,
                    Ok(Err(e)) => {
                        // Advisory gate backed by an unreliable tool: a review
                        // outage must not become a false escalation.
                        warn!(task_id = %self.req.task_id, error = %e, "Review infrastructure failed, approving with warning");
                        steps.push(timer.finish(StepStatus::Ok, threshold));
                        break;
                    }
                    Err(_) => {
                        warn!(task_id = %self.req.task_id, "Review timed out, approving with warning");
                        steps.push(timer.finish(StepStatus::Ok, threshold));
                        break;
                    }
                };

                attempt_tokens.push(ActivityTokens {
                    activity: "review".to_string(),
                    tokens: review.tokens,
                });
                steps.push(timer.finish(StepStatus::Ok, threshold));

                if review.approved {
                    debug!(task_id = %self.req.task_id, reviewer = %review.reviewer, "Review approved");
                    break;
                }

                // Swap implementer and reviewer so the re-execution gets a
                // diverse perspective, and carry the critique in the plan.
                for issue in &review.issues {
                    plan.record_error(format!("review ({}): {}", review.reviewer, issue));
                }
                std::mem::swap(&mut implementer, &mut reviewer);
                handoffs += 1;
                info!(task_id = %self.req.task_id, handoffs, implementer = %implementer, "Review rejected, handing off");

                let timer = StepTimer::start(format!("handoff-execute[{handoffs}]"));
                exec_result = match timeout(
                    EXECUTE_TIMEOUT,
                    self.activities.execute(&ctx, &self.req, &plan, &implementer),
                )
                .await
                {
                    Ok(Ok(result)) => {
                        attempt_tokens.push(ActivityTokens {
                            activity: "handoff-execute".to_string(),
                            tokens: result.tokens,
                        });
                        steps.push(timer.finish(StepStatus::Ok, threshold));
                        result
                    }
                    Ok(Err(e)) => {
                        steps.push(timer.finish(StepStatus::Failed, threshold));
                        last_failure = format!("handoff execute failed: {e}");
                        plan.record_error(last_failure.clone());
                        attempt_failed = true;
                        break;
                    }
                    Err(_) => {
                        steps.push(timer.finish(StepStatus::Failed, threshold));
                        last_failure = "handoff execute timed out".to_string();
                        plan.record_error(last_failure.clone());
                        attempt_failed = true;
                        break;
                    }
                };
            }
            if attempt_failed {
                continue;
            }

            // Scanning
            let timer = StepTimer::start(format!("semgrep[{attempt}]"));
            match timeout(SCAN_TIMEOUT, self.activities.scan(&ctx, &self.req)).await {
                Ok(Ok(report)) if !report.passed => {
                    steps.push(timer.finish(StepStatus::Failed, threshold));
                    last_failure = report.finding_summary();
                    plan.record_error(last_failure.clone());
                    // Findings restart the attempt before verification runs.
                    continue;
                }
                Ok(Ok(_)) => steps.push(timer.finish(StepStatus::Ok, threshold)),
                Ok(Err(e)) => {
                    warn!(task_id = %self.req.task_id, error = %e, "Scan failed, treating as pass");
                    steps.push(timer.finish(StepStatus::Ok, threshold));
                }
                Err(_) => {
                    warn!(task_id = %self.req.task_id, "Scan timed out, treating as pass");
                    steps.push(timer.finish(StepStatus::Ok, threshold));
                }
            }

            // Verifying
            let timer = StepTimer::start(format!("dod[{attempt}]"));
            let report = match timeout(DOD_TIMEOUT, self.activities.run_dod(&ctx, &self.req)).await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    steps.push(timer.finish(StepStatus::Failed, threshold));
                    last_failure = format!("definition-of-done run failed: {e}");
                    plan.record_error(last_failure.clone());
                    continue;
                }
                Err(_) => {
                    steps.push(timer.finish(StepStatus::Failed, threshold));
                    last_failure = "definition-of-done run timed out".to_string();
                    plan.record_error(last_failure.clone());
                    continue;
                }
            };

            if report.passed {
                steps.push(timer.finish(StepStatus::Ok, threshold));
                let outcome = self.build_outcome(
                    OutcomeStatus::Completed,
                    0,
                    started,
                    true,
                    String::new(),
                    handoffs,
                    attempt_tokens,
                    steps,
                );
                self.record(&outcome).await;
                self.spawn_fanout(&plan, &outcome).await;
                info!(task_id = %self.req.task_id, attempt, "Task completed");
                return Ok(outcome);
            }

            steps.push(timer.finish(StepStatus::Failed, threshold));
            last_failure = report.failure_summary();
            plan.record_error(last_failure.clone());
            warn!(task_id = %self.req.task_id, attempt, "Definition-of-done failed");
        }

        // Escalated
        let timer = StepTimer::start("escalate");
        if let Err(e) = timeout(
            ESCALATE_TIMEOUT,
            self.activities.escalate(&self.req, &last_failure),
        )
        .await
        .unwrap_or_else(|_| Err(eyre!("escalate timed out")))
        {
            warn!(task_id = %self.req.task_id, error = %e, "Escalate activity failed");
        }
        steps.push(timer.finish(StepStatus::Ok, threshold));

        let outcome = self.build_outcome(
            OutcomeStatus::Escalated,
            1,
            started,
            false,
            last_failure,
            handoffs,
            attempt_tokens,
            steps,
        );
        self.record(&outcome).await;
        Err(eyre!(
            "task {} escalated after {} attempts",
            self.req.task_id,
            MAX_DOD_RETRIES
        ))
    }

    /// Plan via the activity, or synthesize one for auto-approved subtasks
    async fn obtain_plan(&self, ctx: &ActivityContext) -> eyre::Result<StructuredPlan> {
        if self.req.auto_approve {
            return Ok(StructuredPlan::synthesized(&self.req));
        }
        let policy = RetryPolicy::new(PLAN_ATTEMPTS, Duration::from_secs(5));
        with_retries(&policy, "plan", |_| async {
            timeout(PLAN_TIMEOUT, self.activities.plan(ctx, &self.req))
                .await
                .map_err(|_| eyre!("plan activity timed out"))?
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    fn build_outcome(
        &self,
        status: OutcomeStatus,
        exit_code: i32,
        started: Instant,
        dod_passed: bool,
        dod_failure: String,
        handoffs: u32,
        activity_tokens: Vec<ActivityTokens>,
        steps: Vec<StepMetric>,
    ) -> OutcomeRecord {
        OutcomeRecord {
            task_id: self.req.task_id.clone(),
            status,
            exit_code,
            duration_s: started.elapsed().as_secs_f64(),
            dod_passed,
            dod_failure,
            handoffs,
            activity_tokens,
            steps,
        }
    }

    /// Record the outcome, retrying transient failures; never panics
    async fn record(&self, outcome: &OutcomeRecord) {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let result = with_retries(&policy, "record-outcome", |_| async {
            timeout(RECORD_TIMEOUT, self.activities.record_outcome(outcome))
                .await
                .map_err(|_| eyre!("record-outcome timed out"))?
        })
        .await;
        if let Err(e) = result {
            warn!(task_id = %self.req.task_id, error = %e, "Failed to record outcome");
        }
    }

    /// Start the detached learner and tactical-groom children
    ///
    /// Both starts are awaited for their acknowledgment; an engine that has
    /// not acked a child by parent close may terminate it as unstarted.
    async fn spawn_fanout(&self, plan: &StructuredPlan, outcome: &OutcomeRecord) {
        match self.fanout.spawn_learner(&self.req, plan, outcome).await {
            Ok(ack) => debug!(task_id = %self.req.task_id, run_id = %ack.run_id, "Learner started"),
            Err(e) => warn!(task_id = %self.req.task_id, error = %e, "Failed to start learner"),
        }
        match self.fanout.spawn_tactical_groom(&self.req).await {
            Ok(ack) => debug!(task_id = %self.req.task_id, run_id = %ack.run_id, "Tactical groom started"),
            Err(e) => warn!(task_id = %self.req.task_id, error = %e, "Failed to start tactical groom"),
        }
    }
}
