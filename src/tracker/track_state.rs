/// Track state enumeration for the tracking lifecycle.
///
/// `Tentative → Confirmed ⇄ Lost → Removed`. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrackState {
    /// Newly created track, filtering detector flicker before committing an identity
    #[default]
    Tentative,
    /// Confirmed track matched on the current frame
    Confirmed,
    /// Confirmed track coasting on predictions since its last match
    Lost,
    /// Removed from tracking, never revived
    Removed,
}

impl TrackState {
    /// Confirmed tracks, including ones currently coasting.
    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed | Self::Lost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
            Self::Lost => "lost",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for TrackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
