/// Lifecycle of one station revision in the streaming cache.
///
/// NotLoaded → Downloading → LoadedLowRes → LoadedFullRes
///
/// A revision can skip `LoadedLowRes` when the full-resolution leg wins, and
/// falls back to `NotLoaded` when evicted, purged or aborted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ResidencyState {
    #[default]
    NotLoaded,
    Downloading,
    LoadedLowRes,
    LoadedFullRes,
}

impl ResidencyState {
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::LoadedLowRes | Self::LoadedFullRes)
    }
}
