/// Error of every cluster and sync operation. Carries the message it will
/// be reported with.
#[derive(Debug)]
pub struct AppError {
    pub message: String,
}

impl AppError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[macro_export]
macro_rules! app_error {
    ($($arg:tt)*) => {
        $crate::error::AppError::new(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! app_err {
    ($($arg:tt)*) => {
        Err($crate::app_error!($($arg)*))
    };
}

impl std::error::Error for AppError {}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// API errors keep the server's wording, e.g. `persistentvolumeclaims "x" already exists`
impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => AppError::new(response.message),
            other => AppError::new(other.to_string()),
        }
    }
}

impl From<kube::config::KubeconfigError> for AppError {
    fn from(err: kube::config::KubeconfigError) -> Self {
        app_error!("Invalid kubeconfig: {err}")
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::new(err.to_string())
    }
}
