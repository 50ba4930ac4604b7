use std::io::{self, ErrorKind};

use http::StatusCode;
use thiserror::Error;
use xml::writer::Error as XmlWError;

use crate::fs::FsError;

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug, Error)]
pub(crate) enum DavError {
    #[error("XML parse error")]
    XmlReadError,
    #[error("XML generate error")]
    XmlWriteError,
    #[error("invalid path")]
    InvalidPath,
    #[error("illegal path")]
    IllegalPath,
    #[error("malformed destination: {0}")]
    MalformedDestination(String),
    #[error("unknown method")]
    UnknownDavMethod,
    #[error("status {0}")]
    Status(StatusCode),
    #[error("status {0} (close)")]
    StatusClose(StatusCode),
    #[error("filesystem error: {0}")]
    FsError(#[from] FsError),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<XmlWError> for DavError {
    fn from(e: XmlWError) -> Self {
        match e {
            XmlWError::Io(e) => DavError::IoError(e),
            _ => DavError::XmlWriteError,
        }
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::XmlReadError
    }
}

// Map a store error onto a status for single-resource operations.
pub(crate) fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::InsufficientPermissions => StatusCode::FORBIDDEN,
        FsError::DuplicateName => StatusCode::CONFLICT,
        FsError::QuotaExceeded => StatusCode::PAYLOAD_TOO_LARGE,
        FsError::Io(_) | FsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::MalformedDestination(_) => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::FsError(e) => fserror_to_status(e),
            DavError::IoError(e) => ioerror_to_status(e),
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_) | &DavError::FsError(_) | &DavError::MalformedDestination(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fserror_status() {
        let e: DavError = FsError::QuotaExceeded.into();
        assert_eq!(e.statuscode(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!e.must_close());
        let e: DavError = FsError::DuplicateName.into();
        assert_eq!(e.statuscode(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_io_error_status() {
        let e: DavError = io::Error::new(ErrorKind::InvalidInput, "name too long").into();
        assert_eq!(e.statuscode(), StatusCode::INTERNAL_SERVER_ERROR);
        let e: DavError = io::Error::new(ErrorKind::NotFound, "gone").into();
        assert_eq!(e.statuscode(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_close() {
        let e = DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(e.statuscode(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(e.must_close());
        let e: DavError = StatusCode::PRECONDITION_FAILED.into();
        assert!(!e.must_close());
    }
}
