// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for FuseMod Core

use fusemod_proto::ErrorCode;

/// Tree store error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("invalid path")]
    InvalidPath,
    #[error("already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("access denied")]
    AccessDenied,
    #[error("the root directory cannot be removed")]
    RootImmutable,
    #[error("out of memory")]
    OutOfMemory,
}

impl FsError {
    /// Status code carried in a control-channel response
    pub fn code(&self) -> ErrorCode {
        match self {
            FsError::InvalidPath => ErrorCode::InvalidPath,
            FsError::AlreadyExists => ErrorCode::AlreadyExists,
            FsError::NotFound => ErrorCode::NotFound,
            FsError::IsADirectory
            | FsError::NotADirectory
            | FsError::AccessDenied
            | FsError::RootImmutable => ErrorCode::InvalidOperation,
            FsError::OutOfMemory => ErrorCode::IoError,
        }
    }

    /// errno reported to the kernel
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::InvalidPath => libc::EINVAL,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotFound => libc::ENOENT,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::AccessDenied => libc::EACCES,
            FsError::RootImmutable => libc::EBUSY,
            FsError::OutOfMemory => libc::ENOMEM,
        }
    }
}

impl From<std::collections::TryReserveError> for FsError {
    fn from(_: std::collections::TryReserveError) -> Self {
        FsError::OutOfMemory
    }
}

pub type FsResult<T> = Result<T, FsError>;
