use crate::flash::FlashError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The flash adapter reported a failure.
    FlashMedia,
    FileAlreadyExists,
    FileNotFound,
    FileProtected,
    NoFreeHandle,
    /// The operation does not match the mode the handle was opened with.
    InvalidMode,
    FilesystemFull,
    EndOfFile,
    /// Unknown drive, unmounted volume or unusable geometry.
    BadDevice,
    /// A record stream or sector chain failed validation.
    FilesystemCorrupted,
    /// The handle is stale or was never issued.
    InvalidHandle,
    /// The reserved id [`FILE_ID_NONE`](crate::FILE_ID_NONE) cannot be created.
    InvalidFileId,
}

impl Error {
    /// Numeric code as used on the host protocol.
    pub const fn code(self) -> i32 {
        match self {
            Self::FlashMedia => -1,
            Self::FileAlreadyExists => -2,
            Self::FileNotFound => -3,
            Self::FileProtected => -4,
            Self::NoFreeHandle => -5,
            Self::InvalidMode => -6,
            Self::FilesystemFull => -7,
            Self::EndOfFile => -8,
            Self::BadDevice => -9,
            Self::FilesystemCorrupted => -10,
            Self::InvalidHandle => -11,
            Self::InvalidFileId => -12,
        }
    }
}

impl From<FlashError> for Error {
    fn from(_error: FlashError) -> Self {
        Self::FlashMedia
    }
}

impl From<Error> for i32 {
    fn from(error: Error) -> Self {
        error.code()
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
