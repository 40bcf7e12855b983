use std::process::Command;

use anyhow::{bail, Context, Result};
use taskforge_types::ProjectDatabase;

/// Schema-only dump of the project database.
pub(crate) fn dump_schema(mysqldump_bin: &str, db: &ProjectDatabase) -> Result<String> {
    run_dump(mysqldump_bin, db, "--no-data")
}

/// Data-only dump of the project database.
pub(crate) fn dump_data(mysqldump_bin: &str, db: &ProjectDatabase) -> Result<String> {
    run_dump(mysqldump_bin, db, "--no-create-info")
}

fn run_dump(mysqldump_bin: &str, db: &ProjectDatabase, mode: &str) -> Result<String> {
    let output = Command::new(mysqldump_bin)
        .args([
            "-h",
            &db.host,
            "-u",
            &db.user,
            &format!("-p{}", db.password),
            mode,
            &db.name,
        ])
        .output()
        .with_context(|| format!("spawn {}", mysqldump_bin))?;

    if !output.status.success() {
        bail!(
            "{} {} exited with {}",
            mysqldump_bin,
            mode,
            output.status
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Apply a SQL dump to the project database via the mysql client.
pub(crate) fn apply_sql(mysql_bin: &str, db: &ProjectDatabase, sql_path: &std::path::Path) -> Result<()> {
    let sql = std::fs::File::open(sql_path)
        .with_context(|| format!("open {}", sql_path.display()))?;
    let status = Command::new(mysql_bin)
        .args([
            "-h",
            &db.host,
            "-u",
            &db.user,
            &format!("-p{}", db.password),
            &db.name,
        ])
        .stdin(sql)
        .status()
        .with_context(|| format!("spawn {}", mysql_bin))?;

    if !status.success() {
        bail!("{} exited with {}", mysql_bin, status);
    }
    Ok(())
}
