use std::path::PathBuf;

use rapk_util::remove_path_quietly;

/// Job-private paths that are removed when the guard drops, whichever way
/// the job ends.
#[derive(Debug, Default)]
pub struct Scratch {
    paths: Vec<PathBuf>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` for removal and hands it back. Anything already at
    /// the path is cleared first.
    pub fn track(&mut self, path: PathBuf) -> PathBuf {
        remove_path_quietly(&path);
        self.paths.push(path.clone());
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            remove_path_quietly(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tracked_paths_are_removed_on_drop() {
        let temp = tempfile::tempdir().unwrap();
        let tree = temp.path().join("job_1");
        let file = temp.path().join("unsigned_1.apk");
        let unrelated = temp.path().join("MyApp.apk");
        fs::write(&unrelated, b"keep").unwrap();

        {
            let mut scratch = Scratch::new();
            let tree = scratch.track(tree.clone());
            fs::create_dir_all(tree.join("res/values")).unwrap();
            fs::write(scratch.track(file.clone()), b"PK").unwrap();
            assert!(file.exists());
        }

        assert!(!tree.exists());
        assert!(!file.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn stale_leftovers_are_cleared_on_track() {
        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join("job_2");
        fs::create_dir_all(stale.join("old")).unwrap();

        let mut scratch = Scratch::new();
        let path = scratch.track(stale.clone());
        assert_eq!(path, stale);
        assert!(!stale.exists());
    }
}
