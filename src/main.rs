use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::runtime::watcher;

mod args;
mod config;
mod consts;
mod crd;
mod ctx;
mod err;
mod hash;
mod model;
mod planner;
mod prober;
mod reconciler;
mod resolver;
mod route_builder;
mod status;
mod utils;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

async fn lease_renew(ctx: std::sync::Arc<reconciler::Context>) {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "gateway-api-ingress-controller".to_string());
    let leadership = kube_leader_election::LeaseLock::new(
        ctx.client.clone(),
        ctx.client.default_namespace(),
        kube_leader_election::LeaseLockParams {
            holder_id: hostname,
            lease_name: "gateway-api-ingress-controller-lock".into(),
            lease_ttl: Duration::from_secs(15),
        },
    );
    loop {
        match leadership.try_acquire_or_renew().await {
            Ok(lease) => {
                if lease.acquired_lease {
                    tracing::info!("acquired leadership lease");
                }
                ctx.is_leader
                    .store(lease.acquired_lease, std::sync::atomic::Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!("failed to acquire or renew lease: {err}");
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Watches cluster-wide pod deletions and cancels any in-flight probes
/// against the deleted pod's IP (spec.md §4.B `cancel_pod_probing`, §8 S3).
async fn watch_pod_deletions(ctx: std::sync::Arc<reconciler::Context>) {
    let pods: Api<Pod> = Api::all(ctx.client.clone());
    let stream = watcher::watcher(pods, watcher::Config::default());
    futures::pin_mut!(stream);
    loop {
        match stream.next().await {
            Some(Ok(watcher::Event::Delete(pod))) => {
                if let Some(ip) = pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()) {
                    ctx.prober.cancel_pod_probing(ip);
                }
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => tracing::warn!("pod watch error: {err}"),
            None => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let (ctx, args) = reconciler::Context::new().await?;
    tracing_subscriber::fmt().with_max_level(args.log_level).init();
    tracing::info!("starting gateway-api-ingress-controller");
    tracing::info!(?args, "CLI configuration");

    let ctx = std::sync::Arc::new(ctx);
    let stop = tokio_util::sync::CancellationToken::new();
    let probe_done = ctx.prober.start(stop.clone());

    let lease_renewer = lease_renew(ctx.clone());
    let pod_watcher = watch_pod_deletions(ctx.clone());

    let ingress_controller = kube::runtime::Controller::new(Api::<crd::Ingress>::all(ctx.client.clone()), watcher::Config::default())
        .run(reconciler::reconcile, reconciler::error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Err(err) = res {
                tracing::warn!("reconcile failed: {err}");
            }
        });

    tokio::select! {
        _ = lease_renewer => {
            tracing::error!("lease renewer task exited unexpectedly");
        },
        _ = ingress_controller => {
            tracing::error!("ingress controller task exited unexpectedly");
        },
        _ = probe_done => {
            tracing::error!("prober worker pool exited unexpectedly");
        },
        _ = pod_watcher => {
            tracing::error!("pod watcher task exited unexpectedly");
        },
    }

    stop.cancel();
    Ok(())
}
