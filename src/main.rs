//! ALB operator - reconciles Ingress groups into cloud load balancers

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alb_operator::builder::BuilderConfig;
use alb_operator::cloud::{CloudRepository, SubnetResolver, TargetGroupFinder};
use alb_operator::controller::{self, Context};
use alb_operator::crd::IngressGroupStatus;
use alb_operator::events::KubeEventPublisher;
use alb_operator::group::KubeIngressLoader;
use alb_operator::scheduler::GroupScheduler;
use alb_operator::status::KubeStatusProjector;

const CONTROLLER_NAME: &str = "alb-operator";

/// Reconciles groups of Ingress objects into cloud application load balancers
#[derive(Parser, Debug)]
#[command(name = "alb-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Cloud folder every managed resource is created in
    #[arg(long, env = "ALB_FOLDER_ID")]
    folder_id: Option<String>,

    /// Cluster prefix baked into every deterministic resource name
    #[arg(long, env = "ALB_CLUSTER_PREFIX")]
    cluster_prefix: Option<String>,

    /// Log group for balancer request logs (omit to disable)
    #[arg(long, env = "ALB_LOG_GROUP_ID")]
    default_log_group_id: Option<String>,

    /// Seconds between retries of a pass waiting on a recoverable condition
    #[arg(long, env = "ALB_REQUEUE_INTERVAL_SECS", default_value_t = 30)]
    requeue_interval_secs: u64,

    /// Seconds between periodic resyncs of a converged group
    #[arg(long, env = "ALB_RESYNC_INTERVAL_SECS", default_value_t = 600)]
    resync_interval_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&IngressGroupStatus::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

/// The cloud API backend the controller converges against
struct CloudBackend {
    repo: Arc<dyn CloudRepository>,
    subnets: Arc<dyn SubnetResolver>,
    target_groups: Arc<dyn TargetGroupFinder>,
}

/// Resolve the cloud API backend for this build.
///
/// The cloud repository is a seam: this tree carries the contract and the
/// reconciliation logic against it, while the concrete API client is linked
/// in by the deployment build.
fn cloud_backend() -> anyhow::Result<CloudBackend> {
    anyhow::bail!(
        "no cloud API backend is linked into this binary; \
         construct controller::Context with a CloudRepository and call controller::run"
    )
}

/// Install the IngressGroupStatus CRD on startup using server-side apply,
/// so the CRD version always matches the operator version
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing IngressGroupStatus CRD...");
    crds.patch(
        "ingressgroupstatuses.alb.cloud.io",
        &params,
        &Patch::Apply(&IngressGroupStatus::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install IngressGroupStatus CRD: {}", e))?;

    Ok(())
}

/// Run in controller mode
async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("ALB operator starting...");

    let folder_id = cli
        .folder_id
        .ok_or_else(|| anyhow::anyhow!("--folder-id (or ALB_FOLDER_ID) is required"))?;
    let cluster_prefix = cli
        .cluster_prefix
        .ok_or_else(|| anyhow::anyhow!("--cluster-prefix (or ALB_CLUSTER_PREFIX) is required"))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let cloud = cloud_backend()?;

    let ctx = Arc::new(Context {
        loader: Arc::new(KubeIngressLoader::new(client.clone())),
        repo: cloud.repo,
        subnets: cloud.subnets,
        target_groups: cloud.target_groups,
        projector: Arc::new(KubeStatusProjector::new(client.clone())),
        events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        scheduler: GroupScheduler::new(),
        builder: BuilderConfig {
            folder_id,
            cluster_prefix,
            default_log_group_id: cli.default_log_group_id,
        },
        requeue_interval: Duration::from_secs(cli.requeue_interval_secs),
        resync_interval: Duration::from_secs(cli.resync_interval_secs),
    });

    controller::run(client, ctx).await;

    tracing::info!("ALB operator shutting down");
    Ok(())
}
