use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".rolodex"))
            .unwrap_or_else(|| PathBuf::from(".rolodex"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Default location of the SQLite database when no data source is configured.
    pub fn database_file(&self) -> PathBuf {
        self.base.join("rolodex.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base(PathBuf::from("/tmp/rolodex-test"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/rolodex-test/config.json"));
        assert_eq!(paths.database_file(), PathBuf::from("/tmp/rolodex-test/rolodex.db"));
    }
}
