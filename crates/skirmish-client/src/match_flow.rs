//! Match-start orchestration, driven by the hosting session.
//!
//! The sequence is linear: gather companies, distribute the game-mode
//! package, run the launch countdown, launch. Any participant departing
//! before launch cancels the whole attempt; after launch only result
//! collection remains. Members follow along automatically, their side
//! lives in the session router.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use skirmish_core::LobbyEvent;
use skirmish_proto::{MatchRequest, MatchResult, ParticipantId, PushBody, ResponseBody, WireError};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::error::{MatchError, RequestError};
use crate::handle::{LocalAuthority, Uplink};

/// Default launch countdown, seconds.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 5;
/// Default grace allowance for slow loaders, seconds.
pub const DEFAULT_GRACE_SECS: u32 = 2;
/// Default bound on each preparation step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Host-side inputs to one match-start attempt.
#[derive(Debug, Clone)]
pub struct MatchSetup {
    /// Compiled game-mode package, distributed verbatim.
    pub package: Vec<u8>,
    /// The host's own company payload.
    pub host_company: Vec<u8>,
    pub countdown_secs: u32,
    pub grace_secs: u32,
    pub step_timeout: Duration,
}

impl MatchSetup {
    pub fn new(package: Vec<u8>, host_company: Vec<u8>) -> Self {
        Self {
            package,
            host_company,
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            grace_secs: DEFAULT_GRACE_SECS,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_countdown(mut self, seconds: u32, grace_secs: u32) -> Self {
        self.countdown_secs = seconds;
        self.grace_secs = grace_secs;
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }
}

struct MatchState {
    /// Members whose cooperation each step waits on. The host is not in
    /// here, it drives.
    expected: BTreeSet<ParticipantId>,
    companies: BTreeMap<ParticipantId, Vec<u8>>,
    confirmed: BTreeSet<ParticipantId>,
    launch_ready: BTreeSet<ParticipantId>,
    /// Everyone a result is awaited from, host included. Fixed at launch.
    expected_results: BTreeSet<ParticipantId>,
    results: Vec<MatchResult>,
    cancelled: Option<String>,
    launched: bool,
}

/// Shared between the driving task and the session router, which records
/// member traffic into it.
pub(crate) struct MatchRuntime {
    state: Mutex<Option<MatchState>>,
    notify: Notify,
}

#[derive(Debug)]
enum WaitOutcome {
    Done,
    Deadline,
    Cancelled(String),
}

impl MatchRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Install a fresh sequence. `false` when one is already running.
    fn begin(&self, expected: BTreeSet<ParticipantId>) -> bool {
        let mut guard = self.state.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(MatchState {
            expected,
            companies: BTreeMap::new(),
            confirmed: BTreeSet::new(),
            launch_ready: BTreeSet::new(),
            expected_results: BTreeSet::new(),
            results: Vec::new(),
            cancelled: None,
            launched: false,
        });
        true
    }

    /// Flag the running sequence as cancelled; the driver notices and
    /// broadcasts. No-op when nothing runs or it is already cancelled.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut guard = self.state.lock();
            let Some(state) = guard.as_mut() else { return };
            if state.cancelled.is_none() {
                state.cancelled = Some(reason.into());
            }
        }
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        *self.state.lock() = None;
        self.notify.notify_waiters();
    }

    /// A participant dropped out. Before launch that cancels the attempt;
    /// afterwards their result simply stops being awaited.
    pub fn participant_left(&self, participant: ParticipantId) {
        {
            let mut guard = self.state.lock();
            let Some(state) = guard.as_mut() else { return };
            if state.launched {
                state.expected_results.remove(&participant);
            } else if state.expected.contains(&participant) && state.cancelled.is_none() {
                state.cancelled =
                    Some(format!("participant {participant} left during match preparation"));
            }
        }
        self.notify.notify_waiters();
    }

    /// Record one piece of member match traffic and produce its response.
    pub fn handle_request(&self, from: ParticipantId, request: MatchRequest) -> ResponseBody {
        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else {
            return ResponseBody::Error(WireError::NoActiveMatch);
        };
        match request {
            MatchRequest::UploadCompany { payload } => {
                state.companies.insert(from, payload);
            }
            MatchRequest::ConfirmPackage => {
                state.confirmed.insert(from);
            }
            MatchRequest::SignalLaunchReady => {
                state.launch_ready.insert(from);
            }
            MatchRequest::UploadResult(result) => {
                if state.results.iter().all(|r| r.participant != from) {
                    state.results.push(result);
                }
            }
        }
        drop(guard);
        self.notify.notify_waiters();
        ResponseBody::Ok
    }

    fn mark_launched(&self, expected_results: BTreeSet<ParticipantId>) {
        if let Some(state) = self.state.lock().as_mut() {
            state.launched = true;
            state.expected_results = expected_results;
        }
        self.notify.notify_waiters();
    }

    /// Park until the predicate holds, the deadline passes, or the
    /// sequence is cancelled or cleared.
    async fn wait_for(
        &self,
        deadline: Instant,
        mut done: impl FnMut(&MatchState) -> bool,
    ) -> WaitOutcome {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let guard = self.state.lock();
                let Some(state) = guard.as_ref() else {
                    return WaitOutcome::Cancelled("match no longer active".to_string());
                };
                if let Some(reason) = &state.cancelled {
                    return WaitOutcome::Cancelled(reason.clone());
                }
                if done(state) {
                    return WaitOutcome::Done;
                }
            }
            if Instant::now() >= deadline {
                return WaitOutcome::Deadline;
            }
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

/// Run the full pre-launch sequence. Returns once every client has been
/// told to launch.
pub(crate) async fn run_start_sequence(
    authority: Arc<LocalAuthority>,
    runtime: Arc<MatchRuntime>,
    setup: MatchSetup,
) -> Result<MatchContext, MatchError> {
    let me = authority.me;
    let (mut expected, scenario, mode, settings) = authority.read(|lobby| {
        let humans: BTreeSet<ParticipantId> = lobby.human_participants().into_iter().collect();
        (
            humans,
            lobby.setting("scenario").map(str::to_string),
            lobby.setting("mode").map(str::to_string),
            lobby.settings().clone(),
        )
    });
    expected.remove(&me);
    let Some(scenario) = scenario else {
        return Err(MatchError::Cancelled {
            reason: "no scenario selected".to_string(),
        });
    };
    let mode = mode.unwrap_or_else(|| "standard".to_string());

    if !runtime.begin(expected.clone()) {
        return Err(MatchError::AlreadyRunning);
    }

    let driver = Driver {
        authority: &authority,
        runtime: &runtime,
        setup: &setup,
        expected: &expected,
    };
    let companies = match driver.run().await {
        Ok(companies) => companies,
        Err(failure) => {
            let reason = match &failure {
                StepFailure::Cancelled(reason) => reason.clone(),
                StepFailure::Disconnected => "connection closed".to_string(),
            };
            driver.abort(&reason).await;
            return Err(match failure {
                StepFailure::Cancelled(reason) => MatchError::Cancelled { reason },
                StepFailure::Disconnected => {
                    MatchError::Request(RequestError::ConnectionClosed)
                }
            });
        }
    };

    Ok(MatchContext {
        authority,
        runtime,
        scenario,
        mode,
        settings,
        companies,
        step_timeout: setup.step_timeout,
    })
}

enum StepFailure {
    Cancelled(String),
    Disconnected,
}

struct Driver<'a> {
    authority: &'a Arc<LocalAuthority>,
    runtime: &'a Arc<MatchRuntime>,
    setup: &'a MatchSetup,
    expected: &'a BTreeSet<ParticipantId>,
}

impl Driver<'_> {
    async fn run(&self) -> Result<BTreeMap<ParticipantId, Vec<u8>>, StepFailure> {
        // 1. gather companies
        let _ = self.authority.events.send(LobbyEvent::CompanyRequested);
        self.broadcast(PushBody::CompanyRequested).await?;
        self.runtime.handle_request(
            self.authority.me,
            MatchRequest::UploadCompany {
                payload: self.setup.host_company.clone(),
            },
        );
        self.step(
            |state| {
                self.expected
                    .iter()
                    .all(|p| state.companies.contains_key(p))
            },
            "company uploads",
        )
        .await?;

        // 2. distribute the package
        self.broadcast(PushBody::PackageAvailable {
            payload: self.setup.package.clone(),
        })
        .await?;
        self.step(
            |state| state.confirmed.is_superset(self.expected),
            "package confirmations",
        )
        .await?;

        // 3. countdown, locally clocked by every client from receipt
        let seconds = self.setup.countdown_secs;
        let grace_secs = self.setup.grace_secs;
        self.broadcast(PushBody::CountdownStarted { seconds, grace_secs })
            .await?;
        let _ = self
            .authority
            .events
            .send(LobbyEvent::CountdownStarted { seconds, grace_secs });
        let deadline =
            Instant::now() + Duration::from_secs(u64::from(seconds) + u64::from(grace_secs));
        match self
            .runtime
            .wait_for(deadline, |state| {
                state.launch_ready.is_superset(self.expected)
            })
            .await
        {
            // everyone ready early, or the clock ran out: launch either way
            WaitOutcome::Done | WaitOutcome::Deadline => {}
            WaitOutcome::Cancelled(reason) => return Err(StepFailure::Cancelled(reason)),
        }

        // 4. launch
        let companies = self
            .runtime
            .state
            .lock()
            .as_ref()
            .map(|state| state.companies.clone())
            .ok_or_else(|| StepFailure::Cancelled("match no longer active".to_string()))?;
        let results_from: BTreeSet<ParticipantId> = self
            .authority
            .read(|lobby| lobby.human_participants())
            .into_iter()
            .collect();
        self.broadcast(PushBody::Launch).await?;
        self.runtime.mark_launched(results_from);
        let _ = self.authority.events.send(LobbyEvent::MatchLaunched);
        Ok(companies)
    }

    async fn step(
        &self,
        done: impl FnMut(&MatchState) -> bool,
        what: &str,
    ) -> Result<(), StepFailure> {
        let deadline = Instant::now() + self.setup.step_timeout;
        match self.runtime.wait_for(deadline, done).await {
            WaitOutcome::Done => Ok(()),
            WaitOutcome::Deadline => Err(StepFailure::Cancelled(format!(
                "timed out waiting for {what}"
            ))),
            WaitOutcome::Cancelled(reason) => Err(StepFailure::Cancelled(reason)),
        }
    }

    async fn broadcast(&self, push: PushBody) -> Result<(), StepFailure> {
        broadcast_push(&self.authority.uplink, push)
            .await
            .map_err(|()| StepFailure::Disconnected)
    }

    async fn abort(&self, reason: &str) {
        let _ = broadcast_push(
            &self.authority.uplink,
            PushBody::MatchCancelled {
                reason: reason.to_string(),
            },
        )
        .await;
        let _ = self.authority.events.send(LobbyEvent::MatchCancelled {
            reason: reason.to_string(),
        });
        self.runtime.clear();
    }
}

async fn broadcast_push(uplink: &Option<mpsc::Sender<Uplink>>, push: PushBody) -> Result<(), ()> {
    match uplink {
        Some(uplink) => uplink
            .send(Uplink::Broadcast(push))
            .await
            .map_err(|_| ()),
        // offline play: nobody to tell
        None => Ok(()),
    }
}

/// A launched match, as the hosting session sees it. Collects results and
/// finalizes; drop it after [`MatchContext::finalize`] or
/// [`MatchContext::cancel`].
pub struct MatchContext {
    authority: Arc<LocalAuthority>,
    runtime: Arc<MatchRuntime>,
    scenario: String,
    mode: String,
    settings: BTreeMap<String, String>,
    companies: BTreeMap<ParticipantId, Vec<u8>>,
    step_timeout: Duration,
}

impl std::fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchContext")
            .field("scenario", &self.scenario)
            .field("mode", &self.mode)
            .field("settings", &self.settings)
            .field("step_timeout", &self.step_timeout)
            .finish_non_exhaustive()
    }
}

impl MatchContext {
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Lobby settings as they stood at launch.
    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    /// Every gathered company payload, the host's included.
    pub fn companies(&self) -> &BTreeMap<ParticipantId, Vec<u8>> {
        &self.companies
    }

    /// Record the host's own result.
    pub fn submit_result(&self, result: MatchResult) -> Result<(), MatchError> {
        match self.runtime.handle_request(self.authority.me, MatchRequest::UploadResult(result)) {
            ResponseBody::Error(_) => Err(MatchError::Cancelled {
                reason: "match no longer active".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Wait for every outstanding result, then fan the full set out.
    ///
    /// A participant that stays silent past the step timeout is given up
    /// on; the match finalizes with whatever arrived.
    pub async fn finalize(self) -> Result<Vec<MatchResult>, MatchError> {
        let deadline = Instant::now() + self.step_timeout;
        let outcome = self
            .runtime
            .wait_for(deadline, |state| {
                state
                    .expected_results
                    .iter()
                    .all(|p| state.results.iter().any(|r| r.participant == *p))
            })
            .await;
        match outcome {
            WaitOutcome::Done => {}
            WaitOutcome::Deadline => {
                tracing::warn!("Finalizing with missing results");
            }
            WaitOutcome::Cancelled(reason) => {
                self.runtime.clear();
                return Err(MatchError::Cancelled { reason });
            }
        }

        let results = self
            .runtime
            .state
            .lock()
            .as_ref()
            .map(|state| state.results.clone())
            .unwrap_or_default();
        let _ = broadcast_push(
            &self.authority.uplink,
            PushBody::MatchFinalized {
                results: results.clone(),
            },
        )
        .await;
        let _ = self.authority.events.send(LobbyEvent::MatchFinalized {
            results: results.clone(),
        });
        self.runtime.clear();
        Ok(results)
    }

    /// Abandon the launched match, telling every member why.
    pub async fn cancel(self, reason: impl Into<String>) {
        let reason = reason.into();
        let _ = broadcast_push(
            &self.authority.uplink,
            PushBody::MatchCancelled {
                reason: reason.clone(),
            },
        )
        .await;
        let _ = self
            .authority
            .events
            .send(LobbyEvent::MatchCancelled { reason });
        self.runtime.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ParticipantId = ParticipantId(11);
    const B: ParticipantId = ParticipantId(12);

    fn active_runtime() -> MatchRuntime {
        let runtime = MatchRuntime::new();
        assert!(runtime.begin([A, B].into_iter().collect()));
        runtime
    }

    #[test]
    fn test_begin_rejects_second_sequence() {
        let runtime = active_runtime();
        assert!(!runtime.begin(BTreeSet::new()));
    }

    #[test]
    fn test_requests_outside_a_match_are_refused() {
        let runtime = MatchRuntime::new();
        let response = runtime.handle_request(A, MatchRequest::ConfirmPackage);
        assert_eq!(response, ResponseBody::Error(WireError::NoActiveMatch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_completes_when_everyone_confirms() {
        let runtime = Arc::new(active_runtime());

        let waiter = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .wait_for(Instant::now() + Duration::from_secs(30), |state| {
                        state.confirmed.is_superset(&[A, B].into_iter().collect())
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;

        runtime.handle_request(A, MatchRequest::ConfirmPackage);
        runtime.handle_request(B, MatchRequest::ConfirmPackage);

        assert!(matches!(waiter.await.unwrap(), WaitOutcome::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reports_deadline() {
        let runtime = active_runtime();
        let outcome = runtime
            .wait_for(Instant::now() + Duration::from_millis(10), |_| false)
            .await;
        assert!(matches!(outcome, WaitOutcome::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_departure_before_launch_cancels() {
        let runtime = Arc::new(active_runtime());

        let waiter = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .wait_for(Instant::now() + Duration::from_secs(30), |_| false)
                    .await
            }
        });
        tokio::task::yield_now().await;

        runtime.participant_left(A);

        match waiter.await.unwrap() {
            WaitOutcome::Cancelled(reason) => assert!(reason.contains("11")),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_departure_after_launch_shrinks_result_set() {
        let runtime = active_runtime();
        runtime.mark_launched([A, B].into_iter().collect());

        runtime.participant_left(A);

        let guard = runtime.state.lock();
        let state = guard.as_ref().unwrap();
        assert!(state.cancelled.is_none());
        assert_eq!(state.expected_results, [B].into_iter().collect());
    }

    #[test]
    fn test_duplicate_results_are_ignored() {
        let runtime = active_runtime();
        let result = MatchResult {
            participant: A,
            scenario: "ridge".into(),
            mode: "standard".into(),
            duration_secs: 300,
            finished_at: chrono::Utc::now(),
            company_delta: vec![1],
        };
        runtime.handle_request(A, MatchRequest::UploadResult(result.clone()));
        runtime.handle_request(A, MatchRequest::UploadResult(result));

        let guard = runtime.state.lock();
        assert_eq!(guard.as_ref().unwrap().results.len(), 1);
    }
}
