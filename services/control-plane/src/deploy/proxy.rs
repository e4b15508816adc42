//! Shared Caddy reverse proxy, one per host.

use std::collections::HashMap;

use appz_id::{HostId, TemplateId};
use appz_remote::{RemoteSession, DEFAULT_TIMEOUT};
use tracing::{debug, info, warn};

use super::RemoteLayout;
use crate::capacity::template_index;
use crate::error::OrchestratorError;
use crate::model::{Template, Workload, WorkloadStatus};
use crate::store::RecordStore;

pub const RELOAD_COMMAND: &str = "docker exec caddy caddy reload --config /etc/caddy/Caddyfile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub domain: String,
    pub upstream: String,
}

/// Routes for every Active workload, plus `pending` if given, sorted by domain.
pub fn routes(
    workloads: &[Workload],
    templates: &HashMap<TemplateId, Template>,
    pending: Option<&Workload>,
) -> Vec<ProxyRoute> {
    let mut routes: Vec<ProxyRoute> = workloads
        .iter()
        .filter(|w| w.status == WorkloadStatus::Active && pending.is_none_or(|p| p.id != w.id))
        .chain(pending)
        .filter_map(|w| match templates.get(&w.template_id) {
            Some(template) => Some(ProxyRoute {
                domain: w.domain.clone(),
                upstream: format!("{}-app:{}", w.id.slug(), template.app_port),
            }),
            None => {
                warn!(workload_id = %w.id, "Template missing, workload left out of proxy config");
                None
            }
        })
        .collect();
    routes.sort_by(|a, b| a.domain.cmp(&b.domain));
    routes
}

pub fn render_caddyfile(routes: &[ProxyRoute]) -> String {
    let mut out = String::from("# Managed by appz. Manual edits are overwritten.\n");
    for route in routes {
        out.push_str(&format!(
            "\n{} {{\n\treverse_proxy {}\n\tencode gzip\n}}\n",
            route.domain, route.upstream
        ));
    }
    out
}

/// Write the host's Caddyfile from current records.
pub async fn write_caddyfile(
    session: &dyn RemoteSession,
    store: &dyn RecordStore,
    layout: &RemoteLayout,
    host_id: HostId,
    pending: Option<&Workload>,
) -> Result<usize, OrchestratorError> {
    let workloads = store.list_workloads_on_host(host_id).await?;
    let templates = template_index(store.list_templates().await?);
    let routes = routes(&workloads, &templates, pending);

    session
        .upload_content(render_caddyfile(&routes).as_bytes(), &layout.caddyfile_path())
        .await?;
    debug!(host_id = %host_id, routes = routes.len(), "Wrote Caddyfile");
    Ok(routes.len())
}

/// Rewrite the Caddyfile and reload Caddy in place.
///
/// A failed reload is logged; the new config is picked up on the next one.
pub async fn regenerate(
    session: &dyn RemoteSession,
    store: &dyn RecordStore,
    layout: &RemoteLayout,
    host_id: HostId,
    pending: Option<&Workload>,
) -> Result<(), OrchestratorError> {
    let routes = write_caddyfile(session, store, layout, host_id, pending).await?;

    match session.exec(RELOAD_COMMAND, DEFAULT_TIMEOUT).await {
        Ok(output) if output.success() => {
            info!(host_id = %host_id, routes, "Reloaded proxy");
        }
        Ok(output) => {
            warn!(host_id = %host_id, exit_code = output.exit_code, stderr = %output.stderr.trim(), "Proxy reload failed");
        }
        Err(e) => {
            warn!(host_id = %host_id, error = %e, "Proxy reload failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Footprint;

    fn workload(template: &Template, domain: &str, status: WorkloadStatus) -> Workload {
        let mut w = Workload::new("acme", template.id, domain);
        w.status = status;
        w
    }

    #[test]
    fn test_routes_only_active_sorted() {
        let template = Template::new("ghost", Footprint::ZERO, Footprint::ZERO, 2368);
        let templates = template_index(vec![template.clone()]);
        let b = workload(&template, "b.test", WorkloadStatus::Active);
        let a = workload(&template, "a.test", WorkloadStatus::Active);
        let stopped = workload(&template, "c.test", WorkloadStatus::Suspended);
        let pending = workload(&template, "0.test", WorkloadStatus::Provisioning);

        let routes = routes(&[b.clone(), a.clone(), stopped], &templates, Some(&pending));

        let domains: Vec<&str> = routes.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["0.test", "a.test", "b.test"]);
        assert_eq!(routes[1].upstream, format!("{}-app:2368", a.id.slug()));
    }

    #[test]
    fn test_render_caddyfile() {
        let text = render_caddyfile(&[ProxyRoute {
            domain: "blog.acme.test".into(),
            upstream: "svc-x-app:80".into(),
        }]);
        assert!(text.contains("blog.acme.test {\n\treverse_proxy svc-x-app:80\n"));
        assert!(render_caddyfile(&[]).starts_with('#'));
    }
}
