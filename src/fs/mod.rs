//! Contains the structs and traits that define the resource store backend.
//!
//! The handler never owns resources. It asks a [`ResourceStore`] for
//! read-mostly snapshots ([`Resource`]) and calls back into the store for
//! every mutation. [`MemStore`] is an in-memory implementation.
use std::fmt::Debug;
use std::io;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::davpath::DavPath;

pub mod memstore;

pub use memstore::MemStore;

macro_rules! id_type {
    ($(#[$m:meta])* $name:ident) => {
        $(#[$m])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

id_type!(
    /// Identity of a user (principal or namespace owner).
    UserId
);
id_type!(FileId);
id_type!(FolderId);
id_type!(
    /// Identity of one stored version of a file's content.
    BodyId
);

/// Errors generated by a store backend.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("object not found")]
    NotFound,
    #[error("insufficient permissions")]
    InsufficientPermissions,
    #[error("duplicate name")]
    DuplicateName,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the ResourceStore methods.
pub type FsFuture<'a, T> = BoxFuture<'a, FsResult<T>>;

/// Content byte stream.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Io(e) => e,
            FsError::NotFound => io::Error::new(io::ErrorKind::NotFound, e),
            FsError::InsufficientPermissions => io::Error::new(io::ErrorKind::PermissionDenied, e),
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct AuditInfo {
    pub created_by: UserId,
    pub creation_date: SystemTime,
    pub modified_by: UserId,
    pub modification_date: SystemTime,
}

impl AuditInfo {
    pub fn new(user: UserId, when: SystemTime) -> AuditInfo {
        AuditInfo {
            created_by: user,
            creation_date: when,
            modified_by: user,
            modification_date: when,
        }
    }
}

/// One version of a file's content.
#[derive(Debug, Clone)]
pub struct FileBody {
    pub id: BodyId,
    pub version: u32,
    pub mime_type: String,
    pub file_size: u64,
    pub audit: AuditInfo,
}

impl FileBody {
    /// `"<size>-<modification millis>"`
    pub fn etag(&self) -> String {
        format!(
            "\"{}-{}\"",
            self.file_size,
            crate::util::millis(self.audit.modification_date)
        )
    }
}

#[derive(Debug, Clone)]
pub struct FileResource {
    pub id: FileId,
    pub name: String,
    pub path: DavPath,
    pub owner: UserId,
    pub deleted: bool,
    pub read_for_all: bool,
    pub versioned: bool,
    pub audit: AuditInfo,
    pub current_body: FileBody,
}

impl FileResource {
    pub fn etag(&self) -> String {
        self.current_body.etag()
    }
}

/// A child folder, by path.
#[derive(Debug, Clone)]
pub struct FolderRef {
    pub id: FolderId,
    pub name: String,
    pub path: DavPath,
}

#[derive(Debug, Clone)]
pub struct FolderResource {
    pub id: FolderId,
    pub name: String,
    pub path: DavPath,
    pub owner: UserId,
    pub deleted: bool,
    pub read_for_all: bool,
    pub audit: AuditInfo,
    pub subfolders: Vec<FolderRef>,
    /// None for the root folder of a namespace.
    pub parent: Option<DavPath>,
}

/// A resolved namespace entry.
#[derive(Debug, Clone)]
pub enum Resource {
    File(FileResource),
    Folder(FolderResource),
}

impl Resource {
    pub fn path(&self) -> &DavPath {
        match self {
            Resource::File(f) => &f.path,
            Resource::Folder(f) => &f.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::File(f) => &f.name,
            Resource::Folder(f) => &f.name,
        }
    }

    pub fn owner(&self) -> UserId {
        match self {
            Resource::File(f) => f.owner,
            Resource::Folder(f) => f.owner,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Resource::File(f) => f.deleted,
            Resource::Folder(f) => f.deleted,
        }
    }

    pub fn read_for_all(&self) -> bool {
        match self {
            Resource::File(f) => f.read_for_all,
            Resource::Folder(f) => f.read_for_all,
        }
    }

    pub fn audit(&self) -> &AuditInfo {
        match self {
            Resource::File(f) => &f.audit,
            Resource::Folder(f) => &f.audit,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Resource::Folder(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Permissions {
    pub fn all() -> Permissions {
        Permissions {
            read: true,
            write: true,
            delete: true,
        }
    }

    pub fn read_only() -> Permissions {
        Permissions {
            read: true,
            ..Permissions::default()
        }
    }
}

/// Handle to content that has been fully received by the store but is
/// not yet attached to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedContent {
    pub handle: u64,
    pub len: u64,
}

/// Sink for incoming file content.
pub trait DavUpload: Send {
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()>;
    fn finish(self: Box<Self>) -> FsFuture<'static, UploadedContent>;
}

/// The storage collaborator.
///
/// All lookups are scoped to a namespace owner. Mutations take the
/// acting user, which the store uses for its own permission checks.
pub trait ResourceStore: Debug + Send + Sync {
    /// Look up a user by name.
    fn find_owner<'a>(&'a self, username: &'a str) -> FsFuture<'a, User>;

    /// Map a path within `owner`'s namespace to a resource.
    fn resource_at_path<'a>(
        &'a self,
        owner: UserId,
        path: &'a DavPath,
        include_deleted: bool,
    ) -> FsFuture<'a, Resource>;

    fn child_files(
        &self,
        user: UserId,
        folder: FolderId,
        include_deleted: bool,
    ) -> FsFuture<Vec<FileResource>>;

    /// Historical version of a file's content.
    fn file_body(&self, user: UserId, file: FileId, version: u32) -> FsFuture<FileBody>;

    /// Open the content of a file. `body` selects a version, None is current.
    fn file_contents(
        &self,
        user: UserId,
        file: FileId,
        body: Option<BodyId>,
    ) -> FsFuture<ByteStream>;

    fn open_upload(&self, user: UserId) -> FsFuture<Box<dyn DavUpload>>;

    fn create_file<'a>(
        &'a self,
        user: UserId,
        folder: FolderId,
        name: &'a str,
        mime_type: &'a str,
        content: UploadedContent,
    ) -> FsFuture<'a, FileResource>;

    fn update_file_contents<'a>(
        &'a self,
        user: UserId,
        file: FileId,
        mime_type: &'a str,
        content: UploadedContent,
    ) -> FsFuture<'a, FileResource>;

    fn create_folder<'a>(
        &'a self,
        user: UserId,
        parent: FolderId,
        name: &'a str,
    ) -> FsFuture<'a, FolderResource>;

    fn delete_file(&self, user: UserId, file: FileId) -> FsFuture<()>;

    /// Deletes the folder and anything still below it.
    fn delete_folder(&self, user: UserId, folder: FolderId) -> FsFuture<()>;

    /// Copy a file to `dest` in `dest_owner`'s namespace. The parent of
    /// `dest` must exist.
    fn copy_file<'a>(
        &'a self,
        user: UserId,
        file: FileId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, FileResource>;

    /// Create a folder at `dest` that takes over the attributes of
    /// `folder`. Children are not copied.
    fn copy_folder<'a>(
        &'a self,
        user: UserId,
        folder: FolderId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, FolderResource>;

    fn move_file_to_path<'a>(
        &'a self,
        user: UserId,
        file: FileId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, ()>;

    /// Move a folder with its whole subtree.
    fn move_folder_to_path<'a>(
        &'a self,
        user: UserId,
        folder: FolderId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, ()>;

    fn trash_file(&self, user: UserId, file: FileId) -> FsFuture<()>;
    fn trash_folder(&self, user: UserId, folder: FolderId) -> FsFuture<()>;
    fn restore_file(&self, user: UserId, file: FileId) -> FsFuture<()>;
    fn restore_folder(&self, user: UserId, folder: FolderId) -> FsFuture<()>;

    fn can_read_folder(&self, user: UserId, folder: FolderId) -> FsFuture<bool>;

    /// Effective permissions of `user` on a resource.
    fn permissions<'a>(&'a self, user: UserId, resource: &'a Resource) -> FsFuture<'a, Permissions>;

    /// Bandwidth bookkeeping. Must not block.
    fn update_accounting(&self, owner: UserId, when: SystemTime, bytes: u64);
}
