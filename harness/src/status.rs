pub use http::StatusCode;
use kube::Error;

const REASON_ALREADY_EXISTS: &str = "AlreadyExists";
const MESSAGE_ALREADY_EXISTS: &str = "already exists";

pub trait HttpStatusCode {
    fn status_code(&self) -> Option<StatusCode>;

    fn is_status_code(&self, status_code: StatusCode) -> bool {
        self.status_code()
            .map(|some| some == status_code)
            .unwrap_or_default()
    }
}

impl HttpStatusCode for kube::Error {
    fn status_code(&self) -> Option<StatusCode> {
        if let Error::Api(error_response) = self {
            StatusCode::from_u16(error_response.code).ok()
        } else {
            None
        }
    }
}

impl<T, E> HttpStatusCode for std::result::Result<T, E>
where
    E: HttpStatusCode,
{
    fn status_code(&self) -> Option<StatusCode> {
        self.as_ref().err().and_then(|e| e.status_code())
    }
}

/// Returns `true` if the API server refused a create because an object with the same name is
/// already present.
pub(crate) fn is_already_exists(error: &kube::Error) -> bool {
    match error {
        Error::Api(response) => {
            response.reason == REASON_ALREADY_EXISTS
                || (response.code == StatusCode::CONFLICT.as_u16()
                    && response.message.contains(MESSAGE_ALREADY_EXISTS))
        }
        other => other.to_string().contains(MESSAGE_ALREADY_EXISTS),
    }
}

/// Converts a `NOT_FOUND` error into `Ok(None)`. Any other error is returned untouched. `f` is
/// called with the swallowed error, which is useful for logging.
pub trait AllowNotFound<T, E> {
    fn allow_not_found<F>(self, f: F) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(E);
}

impl<T, E> AllowNotFound<T, E> for std::result::Result<T, E>
where
    E: HttpStatusCode,
{
    fn allow_not_found<F>(self, f: F) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(E),
    {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_status_code(StatusCode::NOT_FOUND) => {
                f(e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
