use hms_core::Hms;

/// Application state for the REST API server
///
/// Shared by every handler. [`Hms`] holds the configuration and the document store behind
/// `Arc`s, so cloning the state per request is cheap.
#[derive(Clone, Debug)]
pub struct AppState {
    pub hms: Hms,
}

impl AppState {
    pub fn new(hms: Hms) -> Self {
        Self { hms }
    }
}
