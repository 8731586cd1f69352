//! Classification orchestration. Picks a target, runs the probers in order,
//! applies the write policy, and drives cycles back to back until told to stop.

use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use super::StatusVerdict;
use super::login::{CrackedProber, WhitelistProber};
use super::status::StatusProber;
use crate::auth::Credential;
use crate::config::{Config, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SENTINEL_USERNAME, DEFAULT_STATUS_ATTEMPTS};
use crate::db::{Repository, RepositoryError, ResultSink};
use crate::model::{Classification, EndpointId, JoinPath, NotWhitelistedPolicy};
use crate::protocol::{GameClient, ServerAddress};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no target selected; call randomize_target() or set_target() first")]
    NoTarget,
    #[error("no endpoints to classify")]
    EmptyPool,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Knobs the engine takes from the runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub probe_timeout: Duration,
    pub status_attempts: u32,
    pub sentinel_username: String,
    pub policy: NotWhitelistedPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            status_attempts: DEFAULT_STATUS_ATTEMPTS,
            sentinel_username: DEFAULT_SENTINEL_USERNAME.to_string(),
            policy: NotWhitelistedPolicy::default(),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            status_attempts: config.status_attempts,
            sentinel_username: config.sentinel_username.clone(),
            policy: config.not_whitelisted_policy,
        }
    }
}

/// How a single cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Status check said no: players online or the endpoint is unreachable.
    Skipped(StatusVerdict),
    Cracked(Classification),
    NotWhitelisted(Classification),
    /// Both logins failed (or the whitelist check is disabled); nothing written.
    NoOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub endpoint: EndpointId,
    pub address: ServerAddress,
    pub outcome: CycleOutcome,
}

pub struct ClassificationEngine<R, C> {
    repo: R,
    client: C,
    credential: Option<Credential>,
    settings: EngineSettings,
    target: Option<EndpointId>,
}

impl<R, C> ClassificationEngine<R, C>
where
    R: Repository + ResultSink,
    C: GameClient,
{
    /// Without a credential the engine never runs the whitelist check.
    pub fn new(repo: R, client: C, credential: Option<Credential>, settings: EngineSettings) -> Self {
        Self {
            repo,
            client,
            credential,
            settings,
            target: None,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn target(&self) -> Option<EndpointId> {
        self.target
    }

    pub fn set_target(&mut self, endpoint: EndpointId) {
        self.target = Some(endpoint);
    }

    pub fn randomize_target(&mut self) -> Result<EndpointId, EngineError> {
        let endpoint = self
            .repo
            .pick_random_endpoint()?
            .ok_or(EngineError::EmptyPool)?;
        self.target = Some(endpoint);
        Ok(endpoint)
    }

    pub async fn run_on_random(&mut self) -> Result<CycleReport, EngineError> {
        self.randomize_target()?;
        self.run().await
    }

    /// One full probe sequence against the current target.
    pub async fn run(&self) -> Result<CycleReport, EngineError> {
        let endpoint = self.target.ok_or(EngineError::NoTarget)?;
        let address = self.repo.get_address(endpoint)?;
        let timeout_ms = self.settings.probe_timeout.as_millis() as u64;

        let report = |outcome| CycleReport {
            endpoint,
            address: address.clone(),
            outcome,
        };

        let verdict = StatusProber::new(&self.client)
            .with_timeout(timeout_ms)
            .with_attempts(self.settings.status_attempts)
            .probe(&address)
            .await;
        if !verdict.should_proceed() {
            debug!("{} {}: skipped ({:?})", endpoint, address, verdict);
            return Ok(report(CycleOutcome::Skipped(verdict)));
        }

        let (username, known_identity) = match self.repo.pick_random_identity(endpoint)? {
            Some(username) => (username, true),
            None => (self.settings.sentinel_username.clone(), false),
        };

        let cracked = CrackedProber::new(&self.client)
            .with_timeout(timeout_ms)
            .probe(&address, &username)
            .await;
        if let Some(state) = cracked.into_outcome() {
            let not_whitelisted = self
                .settings
                .policy
                .not_whitelisted(JoinPath::Unauthenticated { known_identity });
            let classification = Classification::from_join(&state, true, not_whitelisted);
            self.repo.record_classification(endpoint, &classification)?;
            info!(
                "{} {}: cracked (joined as {}, {} / {})",
                endpoint, address, username, classification.game_mode, classification.level_type
            );
            return Ok(report(CycleOutcome::Cracked(classification)));
        }

        let Some(credential) = &self.credential else {
            return Ok(report(CycleOutcome::NoOutcome));
        };

        let whitelist = WhitelistProber::new(&self.client)
            .with_timeout(timeout_ms)
            .probe(&address, credential)
            .await;
        match whitelist.into_outcome() {
            Some(state) => {
                let not_whitelisted = self.settings.policy.not_whitelisted(JoinPath::Authenticated);
                let classification = Classification::from_join(&state, false, not_whitelisted);
                self.repo.record_classification(endpoint, &classification)?;
                info!(
                    "{} {}: not whitelisted (joined as {}, {} / {})",
                    endpoint,
                    address,
                    credential.profile_name,
                    classification.game_mode,
                    classification.level_type
                );
                Ok(report(CycleOutcome::NotWhitelisted(classification)))
            }
            None => Ok(report(CycleOutcome::NoOutcome)),
        }
    }
}

/// Running totals across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub occupied: u64,
    pub unreachable: u64,
    pub cracked: u64,
    pub not_whitelisted: u64,
    pub no_outcome: u64,
}

impl SchedulerStats {
    pub fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Skipped(StatusVerdict::Unreachable) => self.unreachable += 1,
            CycleOutcome::Skipped(_) => self.occupied += 1,
            CycleOutcome::Cracked(_) => self.cracked += 1,
            CycleOutcome::NotWhitelisted(_) => self.not_whitelisted += 1,
            CycleOutcome::NoOutcome => self.no_outcome += 1,
        }
    }
}

/// Runs classification cycles back to back with no delay in between.
pub struct Scheduler<R, C> {
    engine: ClassificationEngine<R, C>,
    stats: SchedulerStats,
    report_every: u64,
}

impl<R, C> Scheduler<R, C>
where
    R: Repository + ResultSink,
    C: GameClient,
{
    pub fn new(engine: ClassificationEngine<R, C>) -> Self {
        Self {
            engine,
            stats: SchedulerStats::default(),
            report_every: 0,
        }
    }

    pub fn with_report_interval(mut self, cycles: u64) -> Self {
        self.report_every = cycles;
        self
    }

    pub fn engine(&self) -> &ClassificationEngine<R, C> {
        &self.engine
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Loop until `should_stop` returns true; it is checked before every cycle.
    /// Repository failures and an empty pool end the loop with an error.
    pub async fn run_until<F>(&mut self, mut should_stop: F) -> Result<SchedulerStats, EngineError>
    where
        F: FnMut(&SchedulerStats) -> bool,
    {
        while !should_stop(&self.stats) {
            let report = self.engine.run_on_random().await?;
            self.stats.record(&report.outcome);

            if self.report_every > 0 && self.stats.cycles % self.report_every == 0 {
                info!(
                    "{} cycles: {} cracked, {} not whitelisted, {} no outcome, {} occupied, {} unreachable",
                    self.stats.cycles,
                    self.stats.cracked,
                    self.stats.not_whitelisted,
                    self.stats.no_outcome,
                    self.stats.occupied,
                    self.stats.unreachable
                );
            }
        }
        Ok(self.stats.clone())
    }
}
