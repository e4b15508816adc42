//! Capacity model and placement.
//!
//! A host accepts additional load only if, after adding it, RAM stays under
//! the host's RAM ceiling, CPU under its CPU ceiling and storage under
//! [`STORAGE_CEILING_PERCENT`]. All three must hold.

pub mod advisor;
mod placement;

use std::collections::HashMap;

use appz_id::TemplateId;
use serde::{Deserialize, Serialize};

use crate::model::{Footprint, Host, Resources, Template, Workload};

pub use advisor::CapacityAdvisor;
pub use placement::{refresh_host_usage, reserve_host};

/// Fixed storage ceiling for every host.
pub const STORAGE_CEILING_PERCENT: f64 = 90.0;

/// Upper bound for suggested instance counts.
pub const MAX_SUGGESTED_INSTANCES: u32 = 100;

/// Utilisation percentages of the three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub ram_percent: f64,
    pub cpu_percent: f64,
    pub storage_percent: f64,
}

impl Utilization {
    pub fn max(&self) -> f64 {
        self.ram_percent.max(self.cpu_percent).max(self.storage_percent)
    }

    /// Rounded to one decimal for display.
    #[must_use]
    pub fn rounded(self) -> Self {
        Self {
            ram_percent: round_to(self.ram_percent, 1),
            cpu_percent: round_to(self.cpu_percent, 1),
            storage_percent: round_to(self.storage_percent, 1),
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Utilisation after adding `additional` to the host's current usage.
///
/// `None` when any capacity dimension is zero.
pub fn projected_utilization(host: &Host, additional: &Footprint) -> Option<Utilization> {
    let total = host.capacity;
    if total.ram_gb <= 0.0 || total.cpu_cores <= 0.0 || total.storage_gb <= 0.0 {
        return None;
    }
    Some(Utilization {
        ram_percent: (host.usage.ram_gb * 1024.0 + additional.ram_mb) / (total.ram_gb * 1024.0)
            * 100.0,
        cpu_percent: (host.usage.cpu_cores + additional.cpu_cores) / total.cpu_cores * 100.0,
        storage_percent: (host.usage.storage_gb + additional.storage_gb) / total.storage_gb
            * 100.0,
    })
}

/// Whether `additional` fits on `host` within every ceiling.
pub fn can_fit(host: &Host, additional: &Footprint) -> bool {
    match projected_utilization(host, additional) {
        Some(after) => {
            after.ram_percent <= host.max_ram_percent
                && after.cpu_percent <= host.max_cpu_percent
                && after.storage_percent <= STORAGE_CEILING_PERCENT
        }
        None => false,
    }
}

/// First host, in the order given, that fits `required`.
pub fn find_available_host<'a>(required: &Footprint, candidates: &'a [Host]) -> Option<&'a Host> {
    candidates.iter().find(|host| can_fit(host, required))
}

/// Largest `n <= 100` such that `n` instances of `per_instance` fit.
pub fn suggest_capacity(host: &Host, per_instance: &Footprint) -> u32 {
    let mut count = 0;
    while count < MAX_SUGGESTED_INSTANCES && can_fit(host, &per_instance.times(count + 1)) {
        count += 1;
    }
    count
}

/// Footprint charged for a workload: measured if known, else the estimate.
///
/// A measurement without memory means no container was seen and is ignored.
pub fn footprint_of(workload: &Workload, template: Option<&Template>) -> Footprint {
    workload
        .measured
        .filter(|m| m.ram_mb > 0.0)
        .or_else(|| template.map(advisor::estimate))
        .unwrap_or(Footprint::ZERO)
}

/// Recompute usage, service count and `capacity_percent` from the
/// workloads charged to `host` (Active or Provisioning).
pub fn refresh_usage(host: &mut Host, workloads: &[Workload], templates: &HashMap<TemplateId, Template>) {
    let charged: Vec<&Workload> = workloads
        .iter()
        .filter(|w| w.host_id == Some(host.id) && w.status.counts_toward_usage())
        .collect();

    let total: Footprint = charged
        .iter()
        .map(|w| footprint_of(w, templates.get(&w.template_id)))
        .sum();

    host.usage = Resources {
        ram_gb: round_to(total.ram_mb / 1024.0, 2),
        cpu_cores: round_to(total.cpu_cores, 2),
        storage_gb: round_to(total.storage_gb, 2),
    };
    host.service_count = charged.len() as u32;

    let ratio = |used: f64, total: f64| if total > 0.0 { used / total * 100.0 } else { 0.0 };
    let current = Utilization {
        ram_percent: ratio(total.ram_mb / 1024.0, host.capacity.ram_gb),
        cpu_percent: ratio(total.cpu_cores, host.capacity.cpu_cores),
        storage_percent: ratio(total.storage_gb, host.capacity.storage_gb),
    };
    host.capacity_percent = round_to(current.max(), 1);
}

/// Index templates by id.
pub fn template_index(templates: Vec<Template>) -> HashMap<TemplateId, Template> {
    templates.into_iter().map(|t| (t.id, t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkloadStatus;
    use proptest::prelude::*;
    use rstest::rstest;

    fn host(ram_gb: f64, cpu: f64, storage_gb: f64) -> Host {
        Host::new("h", "10.0.0.1", Resources::new(ram_gb, cpu, storage_gb)).with_ceilings(80.0, 80.0)
    }

    const WORKLOAD: Footprint = Footprint::new(1024.0, 0.5, 5.0);

    #[test]
    fn test_reference_scenario() {
        let host = host(8.0, 4.0, 80.0);

        let after = projected_utilization(&host, &WORKLOAD).unwrap();
        assert_eq!(after.ram_percent, 12.5);
        assert_eq!(after.cpu_percent, 12.5);
        assert_eq!(after.storage_percent, 6.25);
        assert!(can_fit(&host, &WORKLOAD));

        assert!(can_fit(&host, &WORKLOAD.times(6)));
        assert!(!can_fit(&host, &WORKLOAD.times(7)));
        assert_eq!(suggest_capacity(&host, &WORKLOAD), 6);
    }

    #[rstest]
    #[case::storage_only(Footprint::new(512.0, 0.5, 75.0), false)]
    #[case::ram_only(Footprint::new(7000.0, 0.5, 5.0), false)]
    #[case::cpu_only(Footprint::new(512.0, 3.5, 5.0), false)]
    #[case::exactly_at_ceilings(Footprint::new(6553.6, 3.2, 72.0), true)]
    fn test_single_dimension_violation_rejects(#[case] additional: Footprint, #[case] fits: bool) {
        assert_eq!(can_fit(&host(8.0, 4.0, 80.0), &additional), fits);
    }

    #[test]
    fn test_zero_capacity_never_fits() {
        assert!(!can_fit(&host(8.0, 0.0, 80.0), &Footprint::ZERO));
    }

    #[test]
    fn test_first_fit_follows_input_order() {
        let mut full = host(8.0, 4.0, 80.0);
        full.usage = Resources::new(7.0, 1.0, 10.0);
        let a = host(8.0, 4.0, 80.0);
        let b = host(16.0, 8.0, 160.0);

        let hosts = vec![full.clone(), a.clone(), b.clone()];
        assert_eq!(find_available_host(&WORKLOAD, &hosts).map(|h| h.id), Some(a.id));

        let reordered = vec![b.clone(), full.clone(), a.clone()];
        assert_eq!(find_available_host(&WORKLOAD, &reordered).map(|h| h.id), Some(b.id));

        assert!(find_available_host(&WORKLOAD, &[full]).is_none());
    }

    #[test]
    fn test_suggest_capacity_is_bounded() {
        let tiny = Footprint::new(0.001, 0.0001, 0.0001);
        assert_eq!(suggest_capacity(&host(128.0, 64.0, 4000.0), &tiny), MAX_SUGGESTED_INSTANCES);
    }

    #[test]
    fn test_refresh_usage_counts_active_and_provisioning() {
        let mut host = host(8.0, 4.0, 80.0);
        let template = Template::new("custom", Footprint::new(512.0, 0.25, 5.0), Footprint::ZERO, 80);
        let templates = template_index(vec![template.clone()]);

        let mk = |status: WorkloadStatus, measured: Option<Footprint>| {
            let mut w = Workload::new("acme", template.id, "x.test");
            w.host_id = Some(host.id);
            w.status = status;
            w.measured = measured;
            w
        };
        let workloads = vec![
            mk(WorkloadStatus::Active, None),
            mk(WorkloadStatus::Provisioning, Some(Footprint::new(1000.0, 1.0, 2.5))),
            mk(WorkloadStatus::Suspended, None),
            mk(WorkloadStatus::Removed, None),
        ];

        refresh_usage(&mut host, &workloads, &templates);

        assert_eq!(host.service_count, 2);
        // 1512 MB -> 1.4765625 GB
        assert_eq!(host.usage.ram_gb, 1.48);
        assert_eq!(host.usage.cpu_cores, 1.25);
        assert_eq!(host.usage.storage_gb, 7.5);
        // cpu 31.25% dominates
        assert_eq!(host.capacity_percent, 31.3);
    }

    #[test]
    fn test_empty_measurement_falls_back_to_estimate() {
        let template = Template::new("custom", Footprint::new(512.0, 0.25, 5.0), Footprint::ZERO, 80);
        let mut workload = Workload::new("acme", template.id, "x.test");

        workload.measured = Some(Footprint::new(0.0, 0.0, 3.0));
        assert_eq!(footprint_of(&workload, Some(&template)), advisor::estimate(&template));

        workload.measured = Some(Footprint::new(300.0, 0.1, 3.0));
        assert_eq!(footprint_of(&workload, Some(&template)), Footprint::new(300.0, 0.1, 3.0));
    }

    proptest! {
        #[test]
        fn prop_suggest_capacity_boundary(
            ram_mb in 64.0f64..8192.0,
            cpu in 0.05f64..4.0,
            storage in 0.5f64..100.0,
        ) {
            let host = host(32.0, 16.0, 320.0);
            let per = Footprint::new(ram_mb, cpu, storage);
            let n = suggest_capacity(&host, &per);

            prop_assert!(n <= MAX_SUGGESTED_INSTANCES);
            if n > 0 {
                prop_assert!(can_fit(&host, &per.times(n)));
            }
            if n < MAX_SUGGESTED_INSTANCES {
                prop_assert!(!can_fit(&host, &per.times(n + 1)));
            }
        }

        #[test]
        fn prop_can_fit_requires_all_dimensions(
            ram_mb in 0.0f64..16384.0,
            cpu in 0.0f64..8.0,
            storage in 0.0f64..160.0,
        ) {
            let host = host(8.0, 4.0, 80.0);
            let additional = Footprint::new(ram_mb, cpu, storage);
            let after = projected_utilization(&host, &additional).unwrap();
            let expected = after.ram_percent <= 80.0
                && after.cpu_percent <= 80.0
                && after.storage_percent <= STORAGE_CEILING_PERCENT;
            prop_assert_eq!(can_fit(&host, &additional), expected);
        }
    }
}
