//! StackFlow plan files
//!
//! Discovery of the plan file for the current project, and loading it into
//! a validated [`stackflow_cloud::Plan`].

pub mod document;
pub mod error;
pub mod template;

pub use document::{PlanDocument, load_plan_file, parse_plan};
pub use error::*;

use std::path::PathBuf;

/// Environment variable that points at a plan file directly
pub const PLAN_PATH_ENV: &str = "STACKFLOW_PLAN_PATH";

const CANDIDATES: [&str; 4] = [
    "stack.local.yaml",
    ".stack.local.yaml",
    "stack.yaml",
    ".stack.yaml",
];

/// プロジェクトのプランファイルを探す
///
/// Search order:
/// 1. `STACKFLOW_PLAN_PATH` environment variable
/// 2. current directory: stack.local.yaml, .stack.local.yaml, stack.yaml, .stack.yaml
/// 3. the same names inside `./.stackflow/`
/// 4. `~/.config/stackflow/stack.yaml` (global)
pub fn find_plan_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(plan_path) = std::env::var(PLAN_PATH_ENV) {
        let path = PathBuf::from(plan_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points at {} which does not exist",
            PLAN_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.stackflow/ ディレクトリで検索
    let stack_dir = current_dir.join(".stackflow");
    if stack_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = stack_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    // 4. グローバル設定
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join("stack.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::PlanFileNotFound)
}

/// Find and load the plan file, unless `explicit` names one
pub fn load_plan(explicit: Option<PathBuf>) -> Result<PlanDocument> {
    let path = match explicit {
        Some(path) => path,
        None => find_plan_file()?,
    };
    load_plan_file(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_find_plan_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stack.yaml"), "resources: []").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(PLAN_PATH_ENV, find_plan_file);

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("stack.yaml"));
    }

    #[test]
    #[serial]
    fn test_local_file_has_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stack.yaml"), "resources: []").unwrap();
        fs::write(temp_dir.path().join("stack.local.yaml"), "resources: []").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(PLAN_PATH_ENV, find_plan_file);

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("stack.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_hidden_local_beats_visible() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join(".stack.local.yaml"), "resources: []").unwrap();
        fs::write(temp_dir.path().join("stack.yaml"), "resources: []").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(PLAN_PATH_ENV, find_plan_file);

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".stack.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_plan_file_in_stackflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let stack_dir = temp_dir.path().join(".stackflow");
        fs::create_dir(&stack_dir).unwrap();
        fs::write(stack_dir.join("stack.yaml"), "resources: []").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(PLAN_PATH_ENV, find_plan_file);

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".stackflow/stack.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("custom.yaml");
        fs::write(&plan_path, "resources: []").unwrap();

        let result = temp_env::with_var(PLAN_PATH_ENV, Some(&plan_path), find_plan_file);
        assert_eq!(result.unwrap(), plan_path);
    }

    #[test]
    #[serial]
    fn test_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        // HOME を空のディレクトリに向けてグローバル設定を無視
        let result = temp_env::with_vars(
            [
                (PLAN_PATH_ENV, None),
                ("HOME", Some(temp_dir.path().as_os_str())),
                ("XDG_CONFIG_HOME", Some(temp_dir.path().as_os_str())),
            ],
            find_plan_file,
        );

        std::env::set_current_dir(original_dir).unwrap();
        assert!(matches!(result, Err(ConfigError::PlanFileNotFound)));
    }

    #[test]
    #[serial]
    fn test_load_plan_explicit_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan_path = temp_dir.path().join("search.yaml");
        fs::write(
            &plan_path,
            "name: search\nresources:\n  - { id: ns, kind: namespace }\n",
        )
        .unwrap();

        let doc = load_plan(Some(plan_path)).unwrap();
        assert_eq!(doc.display_name(), "search");
        assert_eq!(doc.to_plan().unwrap().len(), 1);
    }
}
