use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = env_value("RAPK_DATA_DIR") {
        return expand_user(&dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/rapk")
    } else {
        std::env::temp_dir().join("rapk")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();
    Ok(())
}

/// Recursively copies `src` into `dest`, creating `dest` if needed.
/// Symlinks are followed so the copy never aliases the source tree.
pub fn copy_dir_all(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut copied = 0u64;
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Removes a file or directory tree, ignoring paths that are already gone.
pub fn remove_path_quietly(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => debug!("removed {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove {}: {err}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_dir_all_copies_nested_tree() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("res/values")).unwrap();
        fs::write(src.join("apktool.yml"), "version: 2.9.1\n").unwrap();
        fs::write(src.join("res/values/strings.xml"), "<resources/>").unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();

        let dest = temp.path().join("dest");
        let copied = copy_dir_all(&src, &dest).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(dest.join("res/values/strings.xml")).unwrap(),
            "<resources/>"
        );
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn remove_path_quietly_handles_files_dirs_and_missing() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("unsigned_1.apk");
        let dir = temp.path().join("job_1");
        fs::write(&file, b"zip").unwrap();
        fs::create_dir_all(dir.join("assets")).unwrap();

        remove_path_quietly(&file);
        remove_path_quietly(&dir);
        remove_path_quietly(&temp.path().join("never-existed"));

        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn write_json_atomic_leaves_no_temp_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state").join("jobs.json");
        write_json_atomic(&path, &vec!["a", "b"]).unwrap();

        let data = fs::read_to_string(&path).unwrap();
        assert!(data.contains("\"a\""));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn expand_user_only_touches_tilde_prefix() {
        assert_eq!(expand_user("/opt/sdk"), PathBuf::from("/opt/sdk"));
        assert_eq!(expand_user("sdk~/x"), PathBuf::from("sdk~/x"));
    }
}
