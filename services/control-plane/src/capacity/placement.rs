use tracing::{debug, info};

use super::{can_fit, find_available_host, footprint_of, refresh_usage, template_index};
use crate::error::OrchestratorError;
use crate::locks::{HostGuard, HostLocks};
use crate::model::{Host, HostStatus, Template, Workload, WorkloadStatus};
use crate::store::RecordStore;

/// Assign `workload` to a host and mark it `Provisioning`.
///
/// Candidates are Active hosts in creation order. The first one that fits
/// according to a usage snapshot is locked and re-checked against fresh
/// usage; on success the workload is saved as `Provisioning` before the
/// guard is handed back, so concurrent placements see the reservation.
/// A workload that already has a host keeps it, provided that host still
/// has room for it once usage is refreshed under the lock.
///
/// Returns `NoCapacity` without touching any record if nothing fits.
pub async fn reserve_host(
    store: &dyn RecordStore,
    locks: &HostLocks,
    workload: &mut Workload,
    template: &Template,
) -> Result<(Host, HostGuard), OrchestratorError> {
    let templates = template_index(store.list_templates().await?);
    let required = footprint_of(workload, Some(template));

    if let Some(host_id) = workload.host_id {
        let guard = locks.lock(host_id).await;
        let mut host = store.get_host(host_id).await?;
        let on_host = store.list_workloads_on_host(host_id).await?;
        refresh_usage(&mut host, &on_host, &templates);

        if !can_fit(&host, &required) {
            debug!(host_id = %host_id, "Assigned host no longer has room");
            return Err(OrchestratorError::NoCapacity(workload.id.to_string()));
        }
        commit(store, workload, host, &templates).await.map(|host| (host, guard))
    } else {
        let all_workloads = store.list_workloads().await?;
        let mut candidates: Vec<Host> = store
            .list_hosts()
            .await?
            .into_iter()
            .filter(|h| h.status == HostStatus::Active)
            .map(|mut h| {
                refresh_usage(&mut h, &all_workloads, &templates);
                h
            })
            .collect();

        while let Some(choice) = find_available_host(&required, &candidates).map(|h| h.id) {
            let guard = locks.lock(choice).await;
            let mut host = store.get_host(choice).await?;
            let on_host = store.list_workloads_on_host(choice).await?;
            refresh_usage(&mut host, &on_host, &templates);

            if host.status == HostStatus::Active && can_fit(&host, &required) {
                workload.host_id = Some(choice);
                info!(workload_id = %workload.id, host_id = %choice, "Placed workload");
                return commit(store, workload, host, &templates)
                    .await
                    .map(|host| (host, guard));
            }

            debug!(host_id = %choice, "Host filled up or left service before it could be reserved");
            candidates.retain(|h| h.id != choice);
        }

        Err(OrchestratorError::NoCapacity(workload.id.to_string()))
    }
}

/// Recompute and persist a host's usage from its workloads.
pub async fn refresh_host_usage(
    store: &dyn RecordStore,
    host_id: appz_id::HostId,
) -> Result<Host, OrchestratorError> {
    let mut host = store.get_host(host_id).await?;
    let workloads = store.list_workloads_on_host(host_id).await?;
    let templates = template_index(store.list_templates().await?);
    refresh_usage(&mut host, &workloads, &templates);
    store.save_host(&host).await?;
    Ok(host)
}

async fn commit(
    store: &dyn RecordStore,
    workload: &mut Workload,
    mut host: Host,
    templates: &std::collections::HashMap<appz_id::TemplateId, Template>,
) -> Result<Host, OrchestratorError> {
    workload.status = WorkloadStatus::Provisioning;
    store.save_workload(workload).await?;

    let on_host = store.list_workloads_on_host(host.id).await?;
    refresh_usage(&mut host, &on_host, templates);
    store.save_host(&host).await?;
    Ok(host)
}
