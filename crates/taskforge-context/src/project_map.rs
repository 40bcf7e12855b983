use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, Utc};
use taskforge_store::ProjectMapRecord;
use walkdir::{DirEntry, WalkDir};

/// Directories excluded from scans: VCS metadata, dependency caches,
/// compiled caches, virtualenvs.
const IGNORE_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    "target",
    "vendor",
    "venv",
    ".venv",
    "dist",
    "build",
];

/// Fixed candidate list for entry-point detection.
const ENTRY_POINT_CANDIDATES: &[&str] = &[
    "app.py",
    "main.py",
    "server.py",
    "manage.py",
    "wsgi.py",
    "asgi.py",
    "index.js",
    "index.ts",
    "index.php",
    "main.go",
    "src/main.rs",
];

const TREE_DEPTH: usize = 3;
const TREE_MAX_CHARS: usize = 5_000;

fn is_ignored(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORE_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Scan a project root into a cacheable map: depth-limited tree,
/// extension histogram language guess, manifest-derived tech stack,
/// entry points, and raw size stats.
pub fn scan_project(root: &Path, expiry_days: i64) -> ProjectMapRecord {
    let now = Utc::now();

    let mut tree = String::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(TREE_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .flatten()
    {
        if tree.len() >= TREE_MAX_CHARS {
            tree.push_str("... (truncated)\n");
            break;
        }
        let depth = entry.depth().saturating_sub(1);
        let name = entry.file_name().to_string_lossy();
        tree.push_str(&"  ".repeat(depth));
        tree.push_str(&name);
        if entry.file_type().is_dir() {
            tree.push('/');
        }
        tree.push('\n');
    }

    let mut file_count: i64 = 0;
    let mut total_size: u64 = 0;
    let mut extensions: HashMap<String, usize> = HashMap::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        file_count += 1;
        if let Ok(meta) = entry.metadata() {
            total_size += meta.len();
        }
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            *extensions.entry(ext.to_ascii_lowercase()).or_default() += 1;
        }
    }

    let entry_points = ENTRY_POINT_CANDIDATES
        .iter()
        .filter(|candidate| root.join(candidate).exists())
        .map(|candidate| candidate.to_string())
        .collect();

    ProjectMapRecord {
        structure_summary: (!tree.is_empty()).then_some(tree),
        entry_points,
        tech_stack: detect_tech_stack(root),
        primary_language: detect_language(&extensions),
        file_count,
        total_size_kb: (total_size / 1024) as i64,
        generated_at: now,
        expires_at: Some(now + Duration::days(expiry_days)),
    }
}

/// Primary language from the extension histogram.
fn detect_language(extensions: &HashMap<String, usize>) -> Option<String> {
    let known: &[(&str, &str)] = &[
        ("py", "Python"),
        ("js", "JavaScript"),
        ("ts", "TypeScript"),
        ("jsx", "React"),
        ("tsx", "React/TypeScript"),
        ("php", "PHP"),
        ("java", "Java"),
        ("go", "Go"),
        ("rs", "Rust"),
        ("rb", "Ruby"),
    ];

    known
        .iter()
        .filter_map(|(ext, label)| extensions.get(*ext).map(|count| (*count, *label)))
        .max_by_key(|(count, _)| *count)
        .map(|(_, label)| label.to_string())
}

/// Frameworks detected from dependency manifests.
fn detect_tech_stack(root: &Path) -> Vec<String> {
    let mut stack = Vec::new();

    if let Ok(requirements) = std::fs::read_to_string(root.join("requirements.txt")) {
        let lower = requirements.to_lowercase();
        for (needle, label) in [
            ("flask", "Flask"),
            ("django", "Django"),
            ("fastapi", "FastAPI"),
            ("sqlalchemy", "SQLAlchemy"),
            ("pytest", "pytest"),
        ] {
            if lower.contains(needle) {
                stack.push(label.to_string());
            }
        }
    }

    if let Ok(package) = std::fs::read_to_string(root.join("package.json"))
        && let Ok(json) = serde_json::from_str::<serde_json::Value>(&package)
    {
        let mut deps = serde_json::Map::new();
        for key in ["dependencies", "devDependencies"] {
            if let Some(map) = json.get(key).and_then(|v| v.as_object()) {
                deps.extend(map.clone());
            }
        }
        for (needle, label) in [
            ("react", "React"),
            ("vue", "Vue"),
            ("express", "Express"),
            ("next", "Next.js"),
        ] {
            if deps.contains_key(needle) {
                stack.push(label.to_string());
            }
        }
    }

    if let Ok(cargo) = std::fs::read_to_string(root.join("Cargo.toml")) {
        let lower = cargo.to_lowercase();
        for (needle, label) in [
            ("axum", "Axum"),
            ("actix-web", "Actix Web"),
            ("rocket", "Rocket"),
            ("tokio", "Tokio"),
        ] {
            if lower.contains(needle) {
                stack.push(label.to_string());
            }
        }
    }

    stack
}

/// Render a cached map as a preamble section.
pub(crate) fn map_section(map: &ProjectMapRecord) -> String {
    let mut parts = vec!["=== PROJECT STRUCTURE ===".to_string()];

    if let Some(structure) = &map.structure_summary {
        let mut structure = structure.clone();
        if structure.len() > 2000 {
            structure.truncate(2000);
            structure.push_str("\n... (truncated)");
        }
        parts.push(structure);
    }
    if !map.tech_stack.is_empty() {
        parts.push(format!("Tech Stack: {}", map.tech_stack.join(", ")));
    }
    if !map.entry_points.is_empty() {
        let shown: Vec<&str> = map.entry_points.iter().take(5).map(String::as_str).collect();
        parts.push(format!("Entry Points: {}", shown.join(", ")));
    }
    if let Some(language) = &map.primary_language {
        parts.push(format!("Primary Language: {}", language));
    }

    parts.push("=========================".to_string());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_detects_language_and_entry_points() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('hi')").unwrap();
        std::fs::write(dir.path().join("util.py"), "x = 1").unwrap();
        std::fs::write(dir.path().join("notes.md"), "# notes").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask==3.0\npytest\n").unwrap();

        let map = scan_project(dir.path(), 7);
        assert_eq!(map.primary_language.as_deref(), Some("Python"));
        assert_eq!(map.entry_points, vec!["app.py".to_string()]);
        assert!(map.tech_stack.contains(&"Flask".to_string()));
        assert!(map.tech_stack.contains(&"pytest".to_string()));
        assert_eq!(map.file_count, 4);
        assert!(map.expires_at.unwrap() > map.generated_at);
    }

    #[test]
    fn scan_skips_ignored_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(dir.path().join("main.go"), "package main").unwrap();

        let map = scan_project(dir.path(), 7);
        assert_eq!(map.file_count, 1);
        assert_eq!(map.primary_language.as_deref(), Some("Go"));
        let tree = map.structure_summary.unwrap();
        assert!(!tree.contains("node_modules"));
    }
}
