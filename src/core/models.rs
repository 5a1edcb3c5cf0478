use serde::{Deserialize, Serialize};

/// Stable identifier of an application in the remote library. Real
/// applications always have a non-zero id; `0` is used as the
/// before-the-start position when cycling through the catalog.
pub type AppId = u32;

/// Play time (in hours) below which a purchase is still refundable.
/// Applications inside this window are candidates for parallel idling.
pub const REFUND_WINDOW_HOURS: f64 = 2.0;

/// One application as reported by the remote library service.
///
/// `remaining_drops` and `play_time` are the only fields that change across
/// refreshes, and only ever via a full snapshot replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    pub remaining_drops: u32,
    pub play_time: f64,
}

impl App {
    /// An app is worth idling while card drops remain.
    pub fn idle_eligible(&self) -> bool {
        self.remaining_drops > 0
    }

    /// Candidate for multi-session idling: drops remain and the app is
    /// still inside the refund window.
    pub fn refund_eligible(&self) -> bool {
        self.idle_eligible() && self.play_time < REFUND_WINDOW_HOURS
    }
}
