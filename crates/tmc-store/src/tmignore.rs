use crate::layout::DEFAULT_IGNORE;
use ::ignore::gitignore::{Gitignore, GitignoreBuilder};
use tmc_model::RepoError;

/// Gitignore-style patterns from `.tmc/.tmignore`.
#[derive(Debug, Clone)]
pub struct TmIgnore {
    matcher: Gitignore,
}

impl TmIgnore {
    pub fn parse(content: &str) -> Result<Self, RepoError> {
        let mut builder = GitignoreBuilder::new("");
        for line in content.lines() {
            builder
                .add_line(None, line)
                .map_err(|e| RepoError::InvalidInput(format!(".tmignore: {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| RepoError::InvalidInput(format!(".tmignore: {e}")))?;
        Ok(Self { matcher })
    }

    pub fn default_patterns() -> Self {
        Self::parse(DEFAULT_IGNORE).unwrap_or_else(|_| Self {
            matcher: Gitignore::empty(),
        })
    }

    /// True if the file at `path`, or any directory above it, is ignored.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.matcher
            .matched_path_or_any_parents(path, false)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns_skip_vcs_dirs() {
        let ig = TmIgnore::default_patterns();
        assert!(ig.is_ignored(".git/config"));
        assert!(ig.is_ignored("a/.github/workflows/ci.yml"));
        assert!(ig.is_ignored("a/b/.DS_Store"));
        assert!(!ig.is_ignored("a/b/c/v1.0.0-20240101000000-aaaaaaaaaaaa.tm.json"));
    }

    #[test]
    fn custom_patterns_and_negation() {
        let ig = TmIgnore::parse("# comment\n*.bak\ndrafts/\n!drafts/keep.tm.json\n").unwrap();
        assert!(ig.is_ignored("x/y.bak"));
        assert!(ig.is_ignored("drafts/a.tm.json"));
        assert!(!ig.is_ignored("x/y.tm.json"));
    }
}
