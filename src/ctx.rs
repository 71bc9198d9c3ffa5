use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;

use crate::args::Args;
use crate::model::CallbackKey;
use crate::reconciler;

/// Builds the prober's ready callback. Waking the controller's reconcile
/// queue for `callback_key` on readiness is out of scope here (the teacher
/// has no watch-trigger channel); the next scheduled resync observes
/// readiness via `Prober::is_probe_active` instead.
fn ready_callback() -> crate::prober::ReadyCallback {
    Arc::new(|key: CallbackKey| {
        tracing::info!(namespace = %key.0, ingress = %key.1, "probe session became ready");
    })
}

impl reconciler::Context {
    pub async fn new() -> anyhow::Result<(Self, Args)> {
        let args = Args::parse();
        let client = kube::Client::try_default().await?;
        let gateway_config = args.gateway_config();
        let prober = crate::prober::Prober::new(client.clone(), gateway_config.clone(), args.prober_config(), ready_callback());
        Ok((
            reconciler::Context {
                client,
                gateway_config,
                prober,
                is_leader: AtomicBool::new(false),
            },
            args,
        ))
    }
}
