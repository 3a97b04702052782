//! Advisory orchestrator
//!
//! Runs the two venue analyses concurrently under one deadline, then feeds
//! the snapshots through the decision engine and the optional history pass.
//! The deadline is the only fan-out in the core: both collaborator calls are
//! abandoned the moment it fires, and a cancelled invocation never touches
//! the history store.

use crate::analyzer::{cloud_cost, local_cost, EnhancedAnalysis, HistoryAnalyzer};
use crate::config::AdvisorSettings;
use crate::error::{AdvisorError, Result};
use crate::history::JobHistoryStore;
use crate::models::{JobRequest, PartitionAnalysis, Venue};
use crate::pricing::PricingClient;
use crate::slurm::SlurmClient;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

pub struct Advisor {
    settings: AdvisorSettings,
    slurm: SlurmClient,
    pricing: PricingClient,
    version: String,
}

impl Advisor {
    pub fn new(settings: AdvisorSettings, version: impl Into<String>) -> Result<Self> {
        settings.validate()?;

        let slurm_timeout = Duration::from_secs(settings.analysis.slurm_timeout_seconds);
        let slurm = SlurmClient::new(settings.slurm_bin_path.clone()).with_timeout(slurm_timeout);

        let pricing = PricingClient::new(
            &settings.cloud.pricing_endpoint,
            slurm_timeout,
            Duration::from_secs(settings.cloud.pricing_cache_minutes * 60),
        )?;

        Ok(Self {
            settings,
            slurm,
            pricing,
            version: version.into(),
        })
    }

    pub fn settings(&self) -> &AdvisorSettings {
        &self.settings
    }

    pub fn slurm(&self) -> &SlurmClient {
        &self.slurm
    }

    /// Analyze both venues concurrently and join under the configured
    /// deadline. A scheduler or pricing failure on either side fails the
    /// whole decision; the deadline cancels whatever is still in flight.
    pub async fn analyze_partitions(
        &self,
        job: &JobRequest,
        target: &str,
        burst: &str,
    ) -> Result<(PartitionAnalysis, PartitionAnalysis)> {
        job.validate()?;

        let deadline = Duration::from_secs(self.settings.analysis.deadline_seconds);
        let (local, cloud) = join_with_deadline(
            deadline,
            self.analyze_local(target, job),
            self.analyze_cloud(burst, job),
        )
        .await?;

        info!(
            target,
            burst,
            local_wait_secs = local.estimated_wait.as_secs(),
            local_cost = local.estimated_cost.total_cost,
            cloud_cost = cloud.estimated_cost.total_cost,
            "partition analyses complete"
        );
        Ok((local, cloud))
    }

    /// Full advisory pass: venue snapshots, baseline decision, and the
    /// history-aware re-plan when a store is supplied.
    pub async fn advise(
        &self,
        job: &JobRequest,
        target: &str,
        burst: &str,
        script_fingerprint: &str,
        store: Option<&JobHistoryStore>,
    ) -> Result<EnhancedAnalysis> {
        let (local, cloud) = self.analyze_partitions(job, target, burst).await?;

        let analyzer = HistoryAnalyzer::new(self.settings.weights, self.version.clone());
        Ok(analyzer.analyze_with_history(&local, &cloud, job, script_fingerprint, store))
    }

    async fn analyze_local(&self, partition: &str, job: &JobRequest) -> Result<PartitionAnalysis> {
        let info = self.slurm.partition_info(partition).await?;
        let queue = self.slurm.queue_info(partition).await?;

        let rates = self.settings.local_rates(partition);
        let mut cost = local_cost(&rates, job);
        cost.validate()?;

        let mut analysis = PartitionAnalysis {
            name: partition.to_string(),
            venue: Venue::Local,
            queue_depth: queue.jobs_pending,
            estimated_wait: queue.estimated_wait,
            // Local resources start as soon as the queue drains.
            startup: Duration::ZERO,
            available_nodes: info.available_nodes(),
            total_nodes: info.total_nodes,
            estimated_cost: cost,
            instance_type: None,
            current_price: None,
        };
        analysis.validate()?;
        Ok(analysis)
    }

    async fn analyze_cloud(&self, partition: &str, job: &JobRequest) -> Result<PartitionAnalysis> {
        let config = self.settings.cloud_partition(partition);
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| self.settings.cloud.region.clone());

        let pricing = self
            .pricing
            .instance_pricing(&config.instance_type, &region)
            .await?;

        let now = Utc::now();
        let mut cost = cloud_cost(job, &pricing, now);
        cost.validate()?;

        let mut analysis = PartitionAnalysis {
            name: partition.to_string(),
            venue: Venue::Cloud,
            // On-demand capacity: no queue, a fixed startup delay instead.
            queue_depth: 0,
            estimated_wait: Duration::ZERO,
            startup: Duration::from_secs(self.settings.cloud.startup_minutes * 60),
            available_nodes: config.max_nodes,
            total_nodes: config.max_nodes,
            estimated_cost: cost,
            instance_type: Some(config.instance_type.clone()),
            current_price: Some(pricing.effective_price(now)),
        };
        analysis.validate()?;
        Ok(analysis)
    }
}

/// Join the two venue analyses under one deadline. Dropping the futures on
/// timeout propagates cancellation into every in-flight collaborator call.
pub(crate) async fn join_with_deadline<L, C>(
    deadline: Duration,
    local: L,
    cloud: C,
) -> Result<(PartitionAnalysis, PartitionAnalysis)>
where
    L: Future<Output = Result<PartitionAnalysis>>,
    C: Future<Output = Result<PartitionAnalysis>>,
{
    match tokio::time::timeout(deadline, async { tokio::try_join!(local, cloud) }).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(deadline_secs = deadline.as_secs(), "analysis deadline crossed");
            Err(AdvisorError::Deadline {
                operation: "analyze_partitions".to_string(),
                seconds: deadline.as_secs(),
            })
        }
    }
}
