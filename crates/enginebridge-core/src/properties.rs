//! Tunable bridge settings.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineProperty {
    /// Number of released frame buffers kept per thread for reuse.
    FramePoolSize,
    /// Initial word capacity of a fresh frame buffer.
    FrameInitialWords,
    /// Check an object's instance id before every instance call.
    AssertInstanceIds,
    /// Log handles still tracked at shutdown.
    ReportLeaks,
    /// Collection passes run before shutdown releases the remainder.
    CyclesOnShutdown,
    /// Upper bound on declared virtual method arguments.
    MaxVirtualArgs,
}

impl EngineProperty {
    pub fn default_value(&self) -> usize {
        match self {
            EngineProperty::FramePoolSize => 8,
            EngineProperty::FrameInitialWords => 16,
            EngineProperty::AssertInstanceIds => 1,
            EngineProperty::ReportLeaks => 1,
            EngineProperty::CyclesOnShutdown => 2,
            EngineProperty::MaxVirtualArgs => 16,
        }
    }
}

/// Property values with fallbacks to [`EngineProperty::default_value`].
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: FxHashMap<EngineProperty, usize>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: EngineProperty, value: usize) -> Self {
        self.set(property, value);
        self
    }

    pub fn set(&mut self, property: EngineProperty, value: usize) {
        self.values.insert(property, value);
    }

    pub fn get(&self, property: EngineProperty) -> usize {
        self.values
            .get(&property)
            .copied()
            .unwrap_or_else(|| property.default_value())
    }

    pub fn flag(&self, property: EngineProperty) -> bool {
        self.get(property) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let props = Properties::new();
        assert_eq!(props.get(EngineProperty::FramePoolSize), 8);
        assert_eq!(props.get(EngineProperty::CyclesOnShutdown), 2);
        assert!(props.flag(EngineProperty::AssertInstanceIds));
    }

    #[test]
    fn overrides() {
        let props = Properties::new()
            .with(EngineProperty::ReportLeaks, 0)
            .with(EngineProperty::FramePoolSize, 2);
        assert!(!props.flag(EngineProperty::ReportLeaks));
        assert_eq!(props.get(EngineProperty::FramePoolSize), 2);
        assert_eq!(props.get(EngineProperty::MaxVirtualArgs), 16);
    }
}
