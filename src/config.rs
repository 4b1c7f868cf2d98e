use crate::{access::AccessNames, job::JobSettings, volume::ClaimTimings};

/// Everything a backup run needs besides the request itself.
#[derive(Debug, Clone)]
pub struct Settings {
    pub access: AccessNames,
    pub job: JobSettings,
    pub timings: ClaimTimings,
}

impl Default for Settings {
    fn default() -> Self {
        let access = AccessNames::default();
        let job = JobSettings {
            service_account: access.service_account.clone(),
            ..Default::default()
        };
        Self {
            access,
            job,
            timings: ClaimTimings::default(),
        }
    }
}
