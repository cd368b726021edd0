//! Address classification at the host boundary.
//!
//! The hub derives a category for each admitted channel from its originating
//! location path. What those paths mean is the host's business; the core
//! only sees the injected classifier.

use switchboard_core::Category;

/// Maps an origin path to a category tag.
pub trait AddressClassifier: Send + Sync {
    /// `None` means "unrecognized" and falls back to [`Category::unknown`].
    fn classify(&self, origin: &str) -> Option<Category>;
}

/// One origin-prefix → category rule.
#[derive(Debug, Clone)]
pub struct RoleEntry {
    pub path_prefix: String,
    pub category: Category,
}

/// Classifier backed by a small table of well-known path prefixes.
///
/// Longest prefix wins, so `/pages/tools/` can shadow `/pages/`.
pub struct RoleMapClassifier {
    roles: Vec<RoleEntry>,
}

impl RoleMapClassifier {
    pub fn new(mut roles: Vec<RoleEntry>) -> Self {
        roles.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Self { roles }
    }
}

impl AddressClassifier for RoleMapClassifier {
    fn classify(&self, origin: &str) -> Option<Category> {
        self.roles
            .iter()
            .find(|role| origin.starts_with(&role.path_prefix))
            .map(|role| role.category.clone())
    }
}
