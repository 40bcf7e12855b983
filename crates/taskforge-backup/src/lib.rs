mod archive;
mod dump;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use taskforge_types::Project;
use tempfile::TempDir;
use tracing::{info, warn};

use archive::{copy_tree, extract_archive, write_archive};

/// Archives kept per project before pruning by mtime.
pub const DEFAULT_RETENTION: usize = 30;

/// What prompted a backup; recorded in the archive name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupTrigger {
    Auto,
    Manual,
    Close,
    Reopen,
    PreRestore,
}

impl BackupTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupTrigger::Auto => "auto",
            BackupTrigger::Manual => "manual",
            BackupTrigger::Close => "close",
            BackupTrigger::Reopen => "reopen",
            BackupTrigger::PreRestore => "pre-restore",
        }
    }
}

/// Snapshots a project's file roots and database into one archive
/// under `<root>/<CODE>/`, pruning old archives past the retention
/// count. Restore is the inverse and always backs up first.
pub struct BackupService {
    root: PathBuf,
    retention: usize,
    mysqldump_bin: String,
    mysql_bin: String,
}

impl BackupService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention: DEFAULT_RETENTION,
            mysqldump_bin: "mysqldump".to_string(),
            mysql_bin: "mysql".to_string(),
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Produce one archive for the project. Contents: `web/` and
    /// `app/` roots when configured, `database/schema.sql` +
    /// `database/data.sql` when the project owns a database, and a
    /// `manifest.json` metadata snapshot.
    pub fn backup_project(&self, project: &Project, trigger: BackupTrigger) -> Result<PathBuf> {
        let project_dir = self.root.join(&project.code);
        fs::create_dir_all(&project_dir)
            .with_context(|| format!("create {}", project_dir.display()))?;

        let staging = TempDir::new().context("create staging dir")?;

        if let Some(web) = project.web_path.as_deref().map(Path::new)
            && web.exists()
        {
            copy_tree(web, &staging.path().join("web"))?;
        }
        if let Some(app) = project.app_path.as_deref().map(Path::new)
            && app.exists()
        {
            copy_tree(app, &staging.path().join("app"))?;
        }

        if let Some(db) = &project.database {
            let db_dir = staging.path().join("database");
            fs::create_dir_all(&db_dir)?;
            match dump::dump_schema(&self.mysqldump_bin, db) {
                Ok(schema) => fs::write(db_dir.join("schema.sql"), schema)?,
                Err(err) => warn!(project = %project.code, error = %err, "schema dump skipped"),
            }
            match dump::dump_data(&self.mysqldump_bin, db) {
                Ok(data) => fs::write(db_dir.join("data.sql"), data)?,
                Err(err) => warn!(project = %project.code, error = %err, "data dump skipped"),
            }
        }

        let manifest = serde_json::json!({
            "project_id": project.id,
            "code": project.code,
            "name": project.name,
            "project_type": project.project_type.as_str(),
            "web_path": project.web_path,
            "app_path": project.app_path,
            "trigger": trigger.as_str(),
            "created_at": Utc::now().to_rfc3339(),
        });
        fs::write(
            staging.path().join("manifest.json"),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        let name = format!(
            "{}_{}_{}.zip",
            project.code,
            Utc::now().format("%Y%m%d_%H%M%S"),
            trigger.as_str()
        );
        // Stage the archive next to its final path so the rename stays
        // on one filesystem.
        let partial = project_dir.join(format!(".{}.partial", name));
        let dest = project_dir.join(&name);
        write_archive(staging.path(), &partial)?;
        fs::rename(&partial, &dest)
            .with_context(|| format!("rename into {}", dest.display()))?;

        self.prune(&project_dir)?;
        info!(project = %project.code, archive = %name, "backup created");
        Ok(dest)
    }

    /// Restore a project from an archive: pre-backup, replace roots
    /// atomically (remove then copy), then apply schema and data SQL.
    pub fn restore_project(&self, project: &Project, archive_path: &Path) -> Result<()> {
        if !archive_path.exists() {
            bail!("archive not found: {}", archive_path.display());
        }

        self.backup_project(project, BackupTrigger::PreRestore)?;

        let staging = TempDir::new().context("create restore dir")?;
        extract_archive(archive_path, staging.path())?;

        if let Some(web) = project.web_path.as_deref().map(Path::new) {
            let source = staging.path().join("web");
            if source.exists() {
                replace_tree(&source, web)?;
            }
        }
        if let Some(app) = project.app_path.as_deref().map(Path::new) {
            let source = staging.path().join("app");
            if source.exists() {
                replace_tree(&source, app)?;
            }
        }

        if let Some(db) = &project.database {
            let schema = staging.path().join("database/schema.sql");
            if schema.exists() {
                dump::apply_sql(&self.mysql_bin, db, &schema)?;
            }
            let data = staging.path().join("database/data.sql");
            if data.exists() {
                dump::apply_sql(&self.mysql_bin, db, &data)?;
            }
        }

        info!(project = %project.code, archive = %archive_path.display(), "restore finished");
        Ok(())
    }

    /// Archives for a project, newest mtime first.
    pub fn list_archives(&self, code: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(code);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut archives: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "zip") {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH);
                archives.push((path, modified));
            }
        }
        archives.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(archives.into_iter().map(|(path, _)| path).collect())
    }

    fn prune(&self, project_dir: &Path) -> Result<()> {
        let code = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let archives = self.list_archives(&code)?;
        for stale in archives.iter().skip(self.retention) {
            if let Err(err) = fs::remove_file(stale) {
                warn!(archive = %stale.display(), error = %err, "prune failed");
            }
        }
        Ok(())
    }
}

/// Remove a directory and replace it with the restored copy.
fn replace_tree(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("remove {}", dest.display()))?;
    }
    copy_tree(source, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_types::{ProjectStatus, ProjectType};

    fn project_with_root(web: &Path) -> Project {
        Project {
            id: 1,
            name: "Demo".to_string(),
            code: "DEMO".to_string(),
            project_type: ProjectType::Web,
            web_path: Some(web.to_string_lossy().into_owned()),
            app_path: None,
            tech_stack: None,
            context: None,
            database: None,
            model: None,
            status: ProjectStatus::Active,
            total_tokens: 0,
            total_duration_seconds: 0,
        }
    }

    #[test]
    fn backup_then_restore_round_trips_files() {
        let backups = tempfile::tempdir().unwrap();
        let web = tempfile::tempdir().unwrap();
        fs::create_dir_all(web.path().join("css")).unwrap();
        fs::write(web.path().join("index.html"), "<h1>v1</h1>").unwrap();
        fs::write(web.path().join("css/site.css"), "body{}").unwrap();

        let service = BackupService::new(backups.path());
        let project = project_with_root(web.path());
        let archive = service
            .backup_project(&project, BackupTrigger::Manual)
            .unwrap();
        assert!(archive.file_name().unwrap().to_string_lossy().contains("_manual"));

        // Mutate, then restore the snapshot.
        fs::write(web.path().join("index.html"), "<h1>v2</h1>").unwrap();
        fs::remove_file(web.path().join("css/site.css")).unwrap();

        service.restore_project(&project, &archive).unwrap();
        assert_eq!(
            fs::read_to_string(web.path().join("index.html")).unwrap(),
            "<h1>v1</h1>"
        );
        assert_eq!(
            fs::read_to_string(web.path().join("css/site.css")).unwrap(),
            "body{}"
        );

        // Restore always pre-backs-up.
        let archives = service.list_archives("DEMO").unwrap();
        assert!(archives
            .iter()
            .any(|a| a.to_string_lossy().contains("pre-restore")));
    }

    #[test]
    fn archives_carry_a_manifest() {
        let backups = tempfile::tempdir().unwrap();
        let web = tempfile::tempdir().unwrap();
        fs::write(web.path().join("a.txt"), "x").unwrap();

        let service = BackupService::new(backups.path());
        let archive = service
            .backup_project(&project_with_root(web.path()), BackupTrigger::Auto)
            .unwrap();

        let out = tempfile::tempdir().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.path().join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["code"], "DEMO");
        assert_eq!(manifest["trigger"], "auto");
        assert_eq!(
            fs::read_to_string(out.path().join("web/a.txt")).unwrap(),
            "x"
        );
    }

    #[test]
    fn prune_keeps_only_the_retention_count() {
        let backups = tempfile::tempdir().unwrap();
        let web = tempfile::tempdir().unwrap();
        fs::write(web.path().join("a.txt"), "x").unwrap();

        let service = BackupService::new(backups.path()).with_retention(3);
        let project = project_with_root(web.path());
        // Distinct triggers keep the names unique within one second.
        for trigger in [
            BackupTrigger::Auto,
            BackupTrigger::Manual,
            BackupTrigger::Close,
            BackupTrigger::Reopen,
            BackupTrigger::PreRestore,
        ] {
            service.backup_project(&project, trigger).unwrap();
            // Distinct mtimes for deterministic prune order.
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(service.list_archives("DEMO").unwrap().len(), 3);
    }
}
