//! Typed ID definitions for all control-plane records.

use crate::define_id;

// =============================================================================
// Infrastructure
// =============================================================================

define_id!(HostId, "host");

// =============================================================================
// Workloads and Templates
// =============================================================================

define_id!(WorkloadId, "svc");
define_id!(TemplateId, "tpl");

// =============================================================================
// Backups
// =============================================================================

define_id!(BackupId, "bkp");
define_id!(BackupConfigId, "bkc");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_host_id_roundtrip() {
        let id = HostId::new();
        let parsed: HostId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_workload_id_prefix() {
        let id = WorkloadId::new();
        assert!(id.to_string().starts_with("svc_"));
    }

    #[test]
    fn test_workload_id_invalid_prefix() {
        let result: Result<WorkloadId, _> = "host_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        let err = result.unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_backup_id_missing_separator() {
        let result: Result<BackupId, _> = "bkp01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_empty_id() {
        let result: Result<TemplateId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<HostId, _> = "host_invalid".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let id = BackupConfigId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: BackupConfigId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_slug_is_lowercase_and_dns_safe() {
        let id: WorkloadId = "svc_01HV4Z3MXNKPQR9HSTZ7WCLD4E".parse().unwrap();
        assert_eq!(id.slug(), "svc-01hv4z3mxnkpqr9hstz7wcld4e");
        assert!(id
            .slug()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_host_ids_sort_by_creation() {
        let id1 = HostId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = HostId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            HostId::PREFIX,
            WorkloadId::PREFIX,
            TemplateId::PREFIX,
            BackupId::PREFIX,
            BackupConfigId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_parse_format_roundtrip(raw in any::<u128>()) {
            let id = WorkloadId::from_ulid(crate::Ulid::from(raw));
            let parsed = WorkloadId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
