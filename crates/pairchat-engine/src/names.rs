use std::collections::HashSet;

/// Display names held by live connections, compared case-insensitively.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self, name: &str) -> bool {
        !self.names.contains(&normalize(name))
    }

    /// Claim a name. Returns false if another connection already holds it.
    pub fn claim(&mut self, name: &str) -> bool {
        self.names.insert(normalize(name))
    }

    pub fn release(&mut self, name: &str) {
        self.names.remove(&normalize(name));
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
