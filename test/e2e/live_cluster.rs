//! Lifecycle flow against a real Proxmox VE cluster.
//!
//! Ignored by default. Requires `PROXMOX_USERNAME`, `PROXMOX_PASSWORD`,
//! `PROXMOX_URL` and `PROXMOX_NODE`; `VMLAB_IMAGE_URL` optionally stages a
//! cloud image as the boot disk.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p vmlab-e2e --test live_cluster -- --ignored
//! ```
//!
//! VMs created here are left on the cluster.

use std::sync::Arc;

use tracing::info;
use vmlab_harness::{
    default_options, random_name, ClusterService, Flow, FlowPlan, ImageDownload, ImageSource,
    Step, VmStatus, NAME_LENGTH,
};
use vmlab_proxmox::{Config, ProxmoxClient};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vmlab_harness=debug,vmlab_tasks=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn client() -> Arc<ProxmoxClient> {
    let config = Config::from_env().expect("PROXMOX_* environment must be set");
    Arc::new(ProxmoxClient::new(config).expect("client"))
}

fn plan() -> FlowPlan {
    let plan = FlowPlan::new(
        format!("vmlab-{}", random_name(NAME_LENGTH)),
        default_options(),
    );

    match std::env::var("VMLAB_IMAGE_URL") {
        Ok(url) => {
            let filename = url
                .rsplit('/')
                .next()
                .unwrap_or("vmlab-image.qcow2")
                .to_string();
            plan.with_image(ImageSource {
                download: ImageDownload {
                    storage: "local".to_string(),
                    url,
                    filename,
                },
                target_storage: "local-lvm".to_string(),
            })
        }
        Err(_) => plan,
    }
}

#[tokio::test]
#[ignore = "needs a Proxmox VE cluster"]
async fn live_lifecycle_flow() {
    init_tracing();

    let flow = Flow::new(client());
    let report = flow.run(&plan()).await.expect("flow");

    info!(vmid = %report.vm_id, "Live flow finished");
    assert_eq!(report.final_status, VmStatus::Stopped);
    assert_eq!(report.steps.last().map(|s| s.step), Some(Step::VerifyStopped));
}

#[tokio::test]
#[ignore = "needs a Proxmox VE cluster"]
async fn live_next_id_is_unused() {
    init_tracing();

    let client = client();
    let id = client.next_id().await.expect("next id");

    assert_eq!(client.vm_status(id).await.expect("status"), VmStatus::Absent);
    assert!(!client.ping_vm(id).await.expect("ping"));
}
