/// Matches advertised names against the configured target peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    target: String,
}

impl DeviceFilter {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// True only for a present name that equals the target exactly
    pub fn matches(&self, name: Option<&str>) -> bool {
        name.is_some_and(|name| name == self.target)
    }
}
