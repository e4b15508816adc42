//! Capacity planning helpers: resource estimates per template, fit reports,
//! per-host instance counts and host-class recommendations for a mix.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{projected_utilization, round_to, Utilization, STORAGE_CEILING_PERCENT};
use crate::model::{Footprint, Host, Resources, Template};

/// Used for mix entries whose template name has no known estimate.
pub const DEFAULT_ESTIMATE: Footprint = Footprint::new(512.0, 0.25, 5.0);

/// Observed per-instance footprints of commonly hosted applications.
const ESTIMATES: &[(&str, Footprint)] = &[
    ("wordpress", Footprint::new(512.0, 0.25, 5.0)),
    ("ghost", Footprint::new(512.0, 0.25, 5.0)),
    ("n8n", Footprint::new(1024.0, 0.5, 5.0)),
    ("plausible", Footprint::new(1024.0, 0.5, 10.0)),
    ("umami", Footprint::new(512.0, 0.25, 5.0)),
    ("strapi", Footprint::new(512.0, 0.25, 5.0)),
    ("directus", Footprint::new(512.0, 0.25, 5.0)),
    ("nocodb", Footprint::new(512.0, 0.25, 5.0)),
    ("gitea", Footprint::new(512.0, 0.25, 10.0)),
    ("minio", Footprint::new(512.0, 0.25, 50.0)),
    ("postgres", Footprint::new(512.0, 0.25, 5.0)),
    ("mariadb", Footprint::new(512.0, 0.25, 5.0)),
    ("redis", Footprint::new(256.0, 0.1, 1.0)),
    ("uptime-kuma", Footprint::new(256.0, 0.1, 1.0)),
    ("static-site", Footprint::new(128.0, 0.1, 1.0)),
    ("erpnext", Footprint::new(4096.0, 1.0, 20.0)),
    ("frappe-crm", Footprint::new(2048.0, 0.5, 10.0)),
];

/// Built-in estimate for a template name, if one exists.
pub fn estimate_by_name(name: &str) -> Option<Footprint> {
    let name = name.trim().to_ascii_lowercase();
    ESTIMATES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, footprint)| *footprint)
}

/// Estimated footprint of one instance of `template`, falling back to its
/// declared minimum.
pub fn estimate(template: &Template) -> Footprint {
    estimate_by_name(&template.name).unwrap_or(template.min)
}

/// A purchasable host size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostClass {
    pub name: String,
    pub specs: Resources,
    pub price_eur: u32,
}

impl HostClass {
    fn new(name: &str, ram_gb: f64, cpu_cores: f64, storage_gb: f64, price_eur: u32) -> Self {
        Self {
            name: name.to_string(),
            specs: Resources::new(ram_gb, cpu_cores, storage_gb),
            price_eur,
        }
    }
}

/// Default catalog, smallest first.
pub fn default_catalog() -> Vec<HostClass> {
    vec![
        HostClass::new("CX22", 4.0, 2.0, 40.0, 4),
        HostClass::new("CX32", 8.0, 4.0, 80.0, 7),
        HostClass::new("CX42", 16.0, 8.0, 160.0, 14),
        HostClass::new("CX52", 32.0, 16.0, 320.0, 28),
        HostClass::new("AX41", 64.0, 8.0, 1000.0, 49),
        HostClass::new("AX52", 64.0, 8.0, 2000.0, 77),
        HostClass::new("AX102", 128.0, 16.0, 3840.0, 130),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitingFactor {
    #[serde(rename = "RAM")]
    Ram,
    #[serde(rename = "CPU")]
    Cpu,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_ram_percent: f64,
    pub max_cpu_percent: f64,
    pub max_storage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub can_fit: bool,
    pub after_deployment: Utilization,
    pub thresholds: Thresholds,
    pub limiting_factor: Option<LimitingFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySuggestion {
    pub template: String,
    pub max_count: u32,
    pub current_usage: Utilization,
    pub estimate_per_instance: Footprint,
}

/// One line of a planned mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixEntry {
    pub template: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Recommendation {
    Fits {
        class: String,
        price_eur: u32,
        specs: Resources,
        requires: Footprint,
        utilization_after: Utilization,
    },
    TooLarge {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct CapacityAdvisor {
    catalog: Vec<HostClass>,
    headroom: f64,
}

impl Default for CapacityAdvisor {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            headroom: 1.25,
        }
    }
}

const CLASS_RAM_MARGIN: f64 = 0.8;
const CLASS_CPU_MARGIN: f64 = 0.7;
const CLASS_STORAGE_MARGIN: f64 = 0.9;

impl CapacityAdvisor {
    pub fn new(catalog: Vec<HostClass>, headroom: f64) -> Self {
        Self { catalog, headroom }
    }

    /// Projected utilisation of `count` instances of `per_instance` on
    /// `host`, with the first exceeded dimension.
    pub fn fit_report(&self, host: &Host, per_instance: &Footprint, count: u32) -> FitReport {
        let thresholds = Thresholds {
            max_ram_percent: host.max_ram_percent,
            max_cpu_percent: host.max_cpu_percent,
            max_storage_percent: STORAGE_CEILING_PERCENT,
        };
        let Some(after) = projected_utilization(host, &per_instance.times(count)) else {
            return FitReport {
                can_fit: false,
                after_deployment: Utilization {
                    ram_percent: 0.0,
                    cpu_percent: 0.0,
                    storage_percent: 0.0,
                },
                thresholds,
                limiting_factor: None,
            };
        };

        let limiting_factor = if after.ram_percent > thresholds.max_ram_percent {
            Some(LimitingFactor::Ram)
        } else if after.cpu_percent > thresholds.max_cpu_percent {
            Some(LimitingFactor::Cpu)
        } else if after.storage_percent > thresholds.max_storage_percent {
            Some(LimitingFactor::Storage)
        } else {
            None
        };

        FitReport {
            can_fit: limiting_factor.is_none(),
            after_deployment: after.rounded(),
            thresholds,
            limiting_factor,
        }
    }

    pub fn suggest_capacity(&self, host: &Host, template: &Template) -> CapacitySuggestion {
        let per_instance = estimate(template);
        let current_usage = projected_utilization(host, &Footprint::ZERO)
            .map(Utilization::rounded)
            .unwrap_or(Utilization {
                ram_percent: 0.0,
                cpu_percent: 0.0,
                storage_percent: 0.0,
            });
        CapacitySuggestion {
            template: template.name.clone(),
            max_count: super::suggest_capacity(host, &per_instance),
            current_usage,
            estimate_per_instance: per_instance,
        }
    }

    /// Instance counts for every template, keyed by template name.
    pub fn suggest_all(&self, host: &Host, templates: &[Template]) -> BTreeMap<String, u32> {
        templates
            .iter()
            .map(|t| (t.name.clone(), super::suggest_capacity(host, &estimate(t))))
            .collect()
    }

    /// Smallest catalog class that holds the mix plus headroom within the
    /// class margins.
    pub fn recommend_host_class(&self, mix: &[MixEntry]) -> Recommendation {
        let required: Footprint = mix
            .iter()
            .map(|entry| {
                estimate_by_name(&entry.template)
                    .unwrap_or(DEFAULT_ESTIMATE)
                    .times(entry.count)
            })
            .sum::<Footprint>()
            .scale(self.headroom);

        let chosen = self.catalog.iter().find(|class| {
            required.ram_mb <= class.specs.ram_gb * 1024.0 * CLASS_RAM_MARGIN
                && required.cpu_cores <= class.specs.cpu_cores * CLASS_CPU_MARGIN
                && required.storage_gb <= class.specs.storage_gb * CLASS_STORAGE_MARGIN
        });

        match chosen {
            Some(class) => Recommendation::Fits {
                class: class.name.clone(),
                price_eur: class.price_eur,
                specs: class.specs,
                requires: Footprint::new(
                    required.ram_mb.floor(),
                    round_to(required.cpu_cores, 2),
                    required.storage_gb.floor(),
                ),
                utilization_after: Utilization {
                    ram_percent: required.ram_mb / (class.specs.ram_gb * 1024.0) * 100.0,
                    cpu_percent: required.cpu_cores / class.specs.cpu_cores * 100.0,
                    storage_percent: required.storage_gb / class.specs.storage_gb * 100.0,
                }
                .rounded(),
            },
            None => Recommendation::TooLarge {
                message: "mix is too large for a single host, consider splitting it".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn host() -> Host {
        Host::new("h", "10.0.0.1", Resources::new(8.0, 4.0, 80.0))
    }

    fn mix(entries: &[(&str, u32)]) -> Vec<MixEntry> {
        entries
            .iter()
            .map(|(template, count)| MixEntry {
                template: template.to_string(),
                count: *count,
            })
            .collect()
    }

    #[test]
    fn test_estimate_prefers_table_then_minimum() {
        let min = Footprint::new(300.0, 0.3, 3.0);
        let known = Template::new("WordPress", min, min, 80);
        let unknown = Template::new("in-house-crm", min, min, 80);

        assert_eq!(estimate(&known), Footprint::new(512.0, 0.25, 5.0));
        assert_eq!(estimate(&unknown), min);
    }

    #[rstest]
    #[case(1, true, None)]
    #[case(12, true, None)]
    #[case(13, false, Some(LimitingFactor::Ram))]
    fn test_fit_report(#[case] count: u32, #[case] fits: bool, #[case] limit: Option<LimitingFactor>) {
        let report = CapacityAdvisor::default().fit_report(&host(), &Footprint::new(512.0, 0.25, 5.0), count);
        assert_eq!(report.can_fit, fits);
        assert_eq!(report.limiting_factor, limit);
        assert_eq!(report.thresholds.max_storage_percent, 90.0);
    }

    #[test]
    fn test_fit_report_names_cpu_before_storage() {
        let report = CapacityAdvisor::default().fit_report(&host(), &Footprint::new(100.0, 4.0, 79.0), 1);
        assert_eq!(report.limiting_factor, Some(LimitingFactor::Cpu));
    }

    #[test]
    fn test_suggest_capacity_uses_estimate() {
        let template = Template::new("wordpress", Footprint::ZERO, Footprint::ZERO, 80);
        let suggestion = CapacityAdvisor::default().suggest_capacity(&host(), &template);
        assert_eq!(suggestion.max_count, 12);
        assert_eq!(suggestion.current_usage.ram_percent, 0.0);

        let all = CapacityAdvisor::default().suggest_all(&host(), &[template]);
        assert_eq!(all.get("wordpress"), Some(&12));
    }

    #[test]
    fn test_recommend_skips_class_on_cpu_margin() {
        // 5760 MB fits a CX32 but 2.8125 cores exceed its 2.8 core margin.
        let advisor = CapacityAdvisor::default();
        match advisor.recommend_host_class(&mix(&[("wordpress", 5), ("n8n", 2)])) {
            Recommendation::Fits { class, price_eur, requires, .. } => {
                assert_eq!(class, "CX42");
                assert_eq!(price_eur, 14);
                assert_eq!(requires.ram_mb, 5760.0);
                assert_eq!(requires.cpu_cores, 2.81);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_recommend_smallest_class_and_unknown_names() {
        let advisor = CapacityAdvisor::default();
        let small = advisor.recommend_host_class(&mix(&[("static-site", 1)]));
        assert!(matches!(small, Recommendation::Fits { ref class, .. } if class == "CX22"));

        let unknown = advisor.recommend_host_class(&mix(&[("something-else", 1)]));
        assert!(matches!(unknown, Recommendation::Fits { ref class, .. } if class == "CX22"));
    }

    #[test]
    fn test_recommend_too_large() {
        let advisor = CapacityAdvisor::default();
        let result = advisor.recommend_host_class(&mix(&[("erpnext", 40)]));
        assert!(matches!(result, Recommendation::TooLarge { .. }));
    }
}
