//! Shell scripts run on the host to produce and consume backup artifacts.
//!
//! Scripts see `SERVICE_ID`, `DATA_PATH`, `BACKUP_PATH` and, when the
//! workload's credentials are available, `DB_ROOT_PASSWORD`.

use appz_remote::shell_quote;

use crate::model::Template;

/// Dumps a MySQL/MariaDB or PostgreSQL `-db` container and tars the data
/// directory without the raw database files.
pub const GENERIC_BACKUP: &str = r#"
cd "${DATA_PATH}"

if docker ps --format '{{.Names}}' | grep -q "${SERVICE_ID}-db"; then
    if docker exec "${SERVICE_ID}-db" mysql --version >/dev/null 2>&1; then
        docker exec "${SERVICE_ID}-db" mysqldump -u root -p"${DB_ROOT_PASSWORD}" --all-databases > "${BACKUP_PATH}/database.sql" || exit 1
    fi
    if docker exec "${SERVICE_ID}-db" psql --version >/dev/null 2>&1; then
        docker exec "${SERVICE_ID}-db" pg_dumpall -U postgres > "${BACKUP_PATH}/database.sql" || exit 1
    fi
fi

tar -czf "${BACKUP_PATH}/data.tar.gz" --exclude=./mysql --exclude=./postgres -C "${DATA_PATH}" . || exit 1

echo '{"service": "'"${SERVICE_ID}"'", "timestamp": "'"$(date -Iseconds)"'"}' > "${BACKUP_PATH}/manifest.json"
"#;

/// Stops the app container, loads the dump into whichever engine the `-db`
/// container runs, unpacks the data tarball and starts the app again.
pub const GENERIC_RESTORE: &str = r#"
cd "${DATA_PATH}"

docker stop "${SERVICE_ID}-app" || true

if [ -f "${BACKUP_PATH}/database.sql" ]; then
    if docker ps --format '{{.Names}}' | grep -q "${SERVICE_ID}-db"; then
        if docker exec "${SERVICE_ID}-db" mysql --version >/dev/null 2>&1; then
            docker exec -i "${SERVICE_ID}-db" mysql -u root -p"${DB_ROOT_PASSWORD}" < "${BACKUP_PATH}/database.sql" || exit 1
        fi
        if docker exec "${SERVICE_ID}-db" psql --version >/dev/null 2>&1; then
            docker exec -i "${SERVICE_ID}-db" psql -U postgres < "${BACKUP_PATH}/database.sql" || exit 1
        fi
    fi
fi

if [ -f "${BACKUP_PATH}/data.tar.gz" ]; then
    tar -xzf "${BACKUP_PATH}/data.tar.gz" -C "${DATA_PATH}" || exit 1
fi

docker start "${SERVICE_ID}-app"
"#;

fn non_empty(script: Option<&str>) -> Option<&str> {
    script.filter(|s| !s.trim().is_empty())
}

pub fn backup_script(template: &Template) -> &str {
    non_empty(template.backup_script.as_deref()).unwrap_or(GENERIC_BACKUP)
}

pub fn restore_script(template: &Template) -> &str {
    non_empty(template.restore_script.as_deref()).unwrap_or(GENERIC_RESTORE)
}

/// A self-contained script file: exports followed by `body`.
pub fn with_environment(env: &[(&str, &str)], body: &str) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for (name, value) in env {
        script.push_str(&format!("export {name}={}\n", shell_quote(value)));
    }
    script.push_str(body);
    if !script.ends_with('\n') {
        script.push('\n');
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Footprint;

    #[test]
    fn test_template_scripts_override_generic() {
        let mut template = Template::new("n8n", Footprint::ZERO, Footprint::ZERO, 5678);
        assert_eq!(backup_script(&template), GENERIC_BACKUP);

        template.backup_script = Some("  \n".into());
        assert_eq!(backup_script(&template), GENERIC_BACKUP);

        template.backup_script = Some("cp -r $DATA_PATH $BACKUP_PATH".into());
        assert_eq!(backup_script(&template), "cp -r $DATA_PATH $BACKUP_PATH");
        assert_eq!(restore_script(&template), GENERIC_RESTORE);
    }

    #[test]
    fn test_environment_values_are_quoted() {
        let script = with_environment(&[("SERVICE_ID", "svc-1"), ("DB_ROOT_PASSWORD", "p'w $x")], "echo ok");
        assert_eq!(
            script,
            "#!/bin/sh\nexport SERVICE_ID=svc-1\nexport DB_ROOT_PASSWORD='p'\\''w $x'\necho ok\n"
        );
    }
}
