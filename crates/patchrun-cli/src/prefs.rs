//! Host preference store.
//!
//! String preferences in a sled tree. Checkpoints live in the same tree
//! under `patchrun_plugin.<subject>`, so removing every `patchrun_`
//! preference also forgets all checkpoints.

use crate::error::Error;

/// Comma-separated list of step directories.
pub const PREF_PATH: &str = "patchrun_path";

/// Shared secret required by `patchrun trigger`.
pub const PREF_KEY: &str = "patchrun_key";

/// Prefix shared by every preference this tool owns.
pub const PREF_PREFIX: &str = "patchrun_";

/// Step directory seeded by `patchrun install`.
pub const DEFAULT_PATH: &str = "../patchrun";

/// Preference store backed by a sled tree.
#[derive(Clone)]
pub struct PrefStore {
    tree: sled::Tree,
}

impl PrefStore {
    /// Tree name for preferences.
    pub const TREE_NAME: &'static str = "prefs";

    /// Open or create the preference tree.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// The underlying tree.
    pub fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    /// Read a preference.
    pub fn get(&self, name: &str) -> Result<Option<String>, Error> {
        match self.tree.get(name)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| Error::InvalidPreference(name.to_string())),
            None => Ok(None),
        }
    }

    /// Read a preference, treating an empty value as unset.
    pub fn get_non_empty(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.get(name)?.filter(|value| !value.is_empty()))
    }

    /// Write a preference.
    pub fn set(&self, name: &str, value: &str) -> Result<(), Error> {
        self.tree.insert(name, value.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }

    /// Return the stored value, storing `default` first if there is none.
    ///
    /// Returns the value and whether it was newly written.
    pub fn get_or_insert(&self, name: &str, default: &str) -> Result<(String, bool), Error> {
        if let Some(existing) = self.get(name)? {
            return Ok((existing, false));
        }
        self.set(name, default)?;
        Ok((default.to_string(), true))
    }

    /// Remove every preference whose name starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize, Error> {
        let mut removed = 0;
        for result in self.tree.scan_prefix(prefix).keys() {
            self.tree.remove(result?)?;
            removed += 1;
        }
        self.tree.flush()?;
        Ok(removed)
    }
}

/// Split a comma-separated preference into trimmed, non-empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (PrefStore, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        (PrefStore::open(&db).unwrap(), temp_dir)
    }

    #[test]
    fn test_get_set() {
        let (prefs, _dir) = open_store();

        assert!(prefs.get(PREF_PATH).unwrap().is_none());
        prefs.set(PREF_PATH, "./updates").unwrap();
        assert_eq!(prefs.get(PREF_PATH).unwrap().as_deref(), Some("./updates"));

        prefs.set(PREF_KEY, "").unwrap();
        assert!(prefs.get_non_empty(PREF_KEY).unwrap().is_none());
    }

    #[test]
    fn test_get_or_insert_keeps_existing() {
        let (prefs, _dir) = open_store();

        let (value, inserted) = prefs.get_or_insert(PREF_PATH, DEFAULT_PATH).unwrap();
        assert_eq!(value, DEFAULT_PATH);
        assert!(inserted);

        prefs.set(PREF_PATH, "/srv/updates").unwrap();
        let (value, inserted) = prefs.get_or_insert(PREF_PATH, DEFAULT_PATH).unwrap();
        assert_eq!(value, "/srv/updates");
        assert!(!inserted);
    }

    #[test]
    fn test_remove_prefix() {
        let (prefs, _dir) = open_store();
        prefs.set(PREF_PATH, "a").unwrap();
        prefs.set(PREF_KEY, "b").unwrap();
        prefs.set("other_setting", "c").unwrap();

        assert_eq!(prefs.remove_prefix(PREF_PREFIX).unwrap(), 2);
        assert!(prefs.get(PREF_PATH).unwrap().is_none());
        assert_eq!(prefs.get("other_setting").unwrap().as_deref(), Some("c"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" ./updates, ../shared ,,"),
            vec!["./updates".to_string(), "../shared".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
