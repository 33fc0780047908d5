//! The canonical trigger kinds

pub mod count;
pub mod emotion;
pub mod idle;
pub mod pressure;
pub mod staging;

pub use count::{CountConfig, CountTrigger};
pub use emotion::{EmotionConfig, EmotionTrigger};
pub use idle::{IdleAction, IdleConfig, IdleContext, IdleSignals, IdleTrigger};
pub use pressure::{PressureConfig, ResourcePressureTrigger};
pub use staging::{DirectoryStaging, StagingConfig, StagingSource, WatchedStagingTrigger};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use crate::cycle::{CycleKind, CycleRequester, RequestStatus};
    use crate::error::CycleError;

    /// Records requests instead of running cycles.
    #[derive(Debug, Default)]
    pub struct RecordingRequester {
        pub requests: Mutex<Vec<(CycleKind, String)>>,
    }

    impl RecordingRequester {
        pub fn taken(&self) -> Vec<(CycleKind, String)> {
            std::mem::take(&mut *self.requests.lock().unwrap())
        }

        pub fn len(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl CycleRequester for RecordingRequester {
        fn request(&self, kind: CycleKind, reason: &str) -> Result<RequestStatus, CycleError> {
            self.requests
                .lock()
                .unwrap()
                .push((kind, reason.to_string()));
            Ok(RequestStatus::Started)
        }
    }
}
