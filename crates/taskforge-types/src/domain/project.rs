use serde::{Deserialize, Serialize};

/// Working directory used when a project has no configured roots.
pub const DEFAULT_PROJECT_ROOT: &str = "/var/www/projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Web,
    App,
    Hybrid,
    Api,
    Other,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Web => "web",
            ProjectType::App => "app",
            ProjectType::Hybrid => "hybrid",
            ProjectType::Api => "api",
            ProjectType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "web" => ProjectType::Web,
            "app" => ProjectType::App,
            "hybrid" => ProjectType::Hybrid,
            "api" => ProjectType::Api,
            _ => ProjectType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "archived" => ProjectStatus::Archived,
            _ => ProjectStatus::Active,
        }
    }
}

/// Credentials for a project-owned database, used for prompt context
/// and for schema/data dumps during backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDatabase {
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
}

/// A logical workspace owning tickets and derived memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    /// Short uppercase alphanumeric code, at most 10 chars (e.g. "WEB").
    pub code: String,
    pub project_type: ProjectType,
    pub web_path: Option<String>,
    pub app_path: Option<String>,
    pub tech_stack: Option<String>,
    pub context: Option<String>,
    pub database: Option<ProjectDatabase>,
    /// Preferred agent model alias; tickets may override it.
    pub model: Option<String>,
    pub status: ProjectStatus,
    pub total_tokens: i64,
    pub total_duration_seconds: i64,
}

impl Project {
    /// The directory the agent runs in: web root, then app root,
    /// then the site-wide default.
    pub fn primary_path(&self) -> &str {
        self.web_path
            .as_deref()
            .or(self.app_path.as_deref())
            .unwrap_or(DEFAULT_PROJECT_ROOT)
    }

    /// Paths the agent is allowed to modify.
    pub fn allowed_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        if let Some(web) = self.web_path.as_deref() {
            paths.push(web);
        }
        if let Some(app) = self.app_path.as_deref() {
            paths.push(app);
        }
        paths
    }
}
