//! Simple in-memory resource store.
//!
//! Holds users, folders and (optionally versioned) files, per-user
//! permissions, quotas and an accounting log. Everything lives behind
//! one lock; the store is cheap to clone and clones share state.
//!
//! Mostly useful for tests and the demo server.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::{future, stream, FutureExt, StreamExt};
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::fs::*;

// Chunk size of content streams.
const CHUNK_SIZE: usize = 4096;

/// Ephemeral in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

/// One accounting record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accounting {
    pub owner: UserId,
    pub when: SystemTime,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    users: Vec<User>,
    roots: HashMap<UserId, u64>,
    nodes: HashMap<u64, Node>,
    uploads: HashMap<u64, Bytes>,
    acl: HashMap<(u64, UserId), Permissions>,
    quotas: HashMap<UserId, u64>,
    accounting: Vec<Accounting>,
}

#[derive(Debug, Clone)]
struct Node {
    owner: UserId,
    parent: Option<u64>,
    name: String,
    deleted: bool,
    read_for_all: bool,
    audit: AuditInfo,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Folder,
    File {
        versioned: bool,
        bodies: Vec<StoredBody>,
    },
}

#[derive(Debug, Clone)]
struct StoredBody {
    body: FileBody,
    data: Bytes,
}

struct MemUpload {
    inner: Arc<Mutex<Inner>>,
    buf: Vec<u8>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node(&self, id: u64) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, id: u64) -> FsResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    fn path_of(&self, id: u64) -> DavPath {
        let mut names = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur.and_then(|id| self.nodes.get(&id)) {
            if n.parent.is_some() {
                names.push(n.name.as_str());
            }
            cur = n.parent;
        }
        let mut path = DavPath::root();
        for name in names.iter().rev() {
            path = path.join(name);
        }
        path
    }

    fn is_deleted(&self, id: u64) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur.and_then(|id| self.nodes.get(&id)) {
            if n.deleted {
                return true;
            }
            cur = n.parent;
        }
        false
    }

    fn children(&self, id: u64) -> Vec<u64> {
        let mut v: Vec<u64> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(id))
            .map(|(k, _)| *k)
            .collect();
        v.sort_unstable();
        v
    }

    fn child_by_name(&self, parent: u64, name: &str, include_deleted: bool) -> Option<u64> {
        self.children(parent).into_iter().find(|c| {
            self.nodes
                .get(c)
                .map(|n| n.name == name && (include_deleted || !n.deleted))
                .unwrap_or(false)
        })
    }

    fn lookup(&self, owner: UserId, path: &DavPath, include_deleted: bool) -> FsResult<u64> {
        let mut cur = *self.roots.get(&owner).ok_or(FsError::NotFound)?;
        for seg in path.as_str().split('/').filter(|s| !s.is_empty()) {
            if !matches!(self.node(cur)?.kind, NodeKind::Folder) {
                return Err(FsError::NotFound);
            }
            cur = self
                .child_by_name(cur, seg, include_deleted)
                .ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }

    // nearest ACL entry on the node or its ancestors. owners can do anything.
    fn permissions(&self, user: UserId, id: u64) -> Permissions {
        match self.nodes.get(&id) {
            Some(n) if n.owner == user => return Permissions::all(),
            None => return Permissions::default(),
            _ => {}
        }
        let mut cur = Some(id);
        while let Some(nid) = cur {
            if let Some(p) = self.acl.get(&(nid, user)) {
                return *p;
            }
            cur = self.nodes.get(&nid).and_then(|n| n.parent);
        }
        match self.nodes.get(&id) {
            Some(n) if n.read_for_all => Permissions::read_only(),
            _ => Permissions::default(),
        }
    }

    fn require(&self, user: UserId, id: u64, check: fn(&Permissions) -> bool) -> FsResult<()> {
        if check(&self.permissions(user, id)) {
            Ok(())
        } else {
            Err(FsError::InsufficientPermissions)
        }
    }

    fn used_bytes(&self, owner: UserId) -> u64 {
        self.nodes
            .values()
            .filter(|n| n.owner == owner)
            .map(|n| match &n.kind {
                NodeKind::File { bodies, .. } => bodies.iter().map(|b| b.data.len() as u64).sum(),
                NodeKind::Folder => 0,
            })
            .sum()
    }

    fn check_quota(&self, owner: UserId, extra: u64) -> FsResult<()> {
        match self.quotas.get(&owner) {
            Some(q) if self.used_bytes(owner) + extra > *q => Err(FsError::QuotaExceeded),
            _ => Ok(()),
        }
    }

    fn folder_of(&self, id: u64) -> FsResult<()> {
        match self.node(id)?.kind {
            NodeKind::Folder => Ok(()),
            NodeKind::File { .. } => Err(FsError::NotFound),
        }
    }

    fn check_unique(&self, parent: u64, name: &str) -> FsResult<()> {
        if name.is_empty() {
            return Err(FsError::Internal("empty name".to_string()));
        }
        match self.child_by_name(parent, name, false) {
            Some(_) => Err(FsError::DuplicateName),
            None => Ok(()),
        }
    }

    fn take_upload(&mut self, content: UploadedContent) -> FsResult<Bytes> {
        self.uploads
            .remove(&content.handle)
            .ok_or_else(|| FsError::Internal("unknown upload".to_string()))
    }

    fn new_body(&mut self, user: UserId, version: u32, mime: &str, data: Bytes) -> StoredBody {
        let id = self.next_id();
        StoredBody {
            body: FileBody {
                id: BodyId(id),
                version,
                mime_type: mime.to_string(),
                file_size: data.len() as u64,
                audit: AuditInfo::new(user, SystemTime::now()),
            },
            data,
        }
    }

    fn insert_node(&mut self, owner: UserId, parent: u64, name: &str, user: UserId, kind: NodeKind) -> u64 {
        let id = self.next_id();
        self.nodes.insert(
            id,
            Node {
                owner,
                parent: Some(parent),
                name: name.to_string(),
                deleted: false,
                read_for_all: false,
                audit: AuditInfo::new(user, SystemTime::now()),
                kind,
            },
        );
        id
    }

    fn remove_tree(&mut self, id: u64) {
        for c in self.children(id) {
            self.remove_tree(c);
        }
        self.nodes.remove(&id);
        self.acl.retain(|(nid, _), _| *nid != id);
    }

    // parent folder id of a destination path, plus the new name.
    fn dest_parent(&self, dest_owner: UserId, dest: &DavPath) -> FsResult<(u64, String)> {
        let name = dest.file_name().to_string();
        if name.is_empty() {
            return Err(FsError::DuplicateName);
        }
        let parent = self.lookup(dest_owner, &dest.parent(), false)?;
        self.folder_of(parent)?;
        self.check_unique(parent, &name)?;
        Ok((parent, name))
    }

    fn file_resource(&self, id: u64) -> FsResult<FileResource> {
        let n = self.node(id)?;
        match &n.kind {
            NodeKind::File { versioned, bodies } => {
                let current = bodies
                    .last()
                    .ok_or_else(|| FsError::Internal("file without body".to_string()))?;
                Ok(FileResource {
                    id: FileId(id),
                    name: n.name.clone(),
                    path: self.path_of(id),
                    owner: n.owner,
                    deleted: self.is_deleted(id),
                    read_for_all: n.read_for_all,
                    versioned: *versioned,
                    audit: n.audit.clone(),
                    current_body: current.body.clone(),
                })
            }
            NodeKind::Folder => Err(FsError::NotFound),
        }
    }

    fn folder_resource(&self, id: u64) -> FsResult<FolderResource> {
        let n = self.node(id)?;
        if !matches!(n.kind, NodeKind::Folder) {
            return Err(FsError::NotFound);
        }
        let mut path = self.path_of(id);
        path.add_slash();
        let subfolders = self
            .children(id)
            .into_iter()
            .filter_map(|c| {
                let cn = self.nodes.get(&c)?;
                match cn.kind {
                    NodeKind::Folder if !cn.deleted => Some(FolderRef {
                        id: FolderId(c),
                        name: cn.name.clone(),
                        path: path.join(&cn.name),
                    }),
                    _ => None,
                }
            })
            .collect();
        Ok(FolderResource {
            id: FolderId(id),
            name: n.name.clone(),
            path,
            owner: n.owner,
            deleted: self.is_deleted(id),
            read_for_all: n.read_for_all,
            audit: n.audit.clone(),
            subfolders,
            parent: n.parent.map(|p| self.path_of(p)),
        })
    }

    fn resource(&self, id: u64) -> FsResult<Resource> {
        match self.node(id)?.kind {
            NodeKind::Folder => Ok(Resource::Folder(self.folder_resource(id)?)),
            NodeKind::File { .. } => Ok(Resource::File(self.file_resource(id)?)),
        }
    }

    fn set_deleted(&mut self, user: UserId, id: u64, deleted: bool) -> FsResult<()> {
        self.require(user, id, |p| p.delete)?;
        if !deleted {
            // restoring next to a live namesake would break uniqueness.
            let n = self.node(id)?;
            if let Some(parent) = n.parent {
                let name = n.name.clone();
                self.check_unique(parent, &name)?;
            }
        }
        let n = self.node_mut(id)?;
        n.deleted = deleted;
        n.audit.modified_by = user;
        n.audit.modification_date = SystemTime::now();
        Ok(())
    }
}

impl MemStore {
    /// Create a new, empty store.
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Add a user with an empty root folder.
    pub fn add_user(&self, username: &str) -> UserId {
        let mut inner = self.inner.lock();
        if let Some(u) = inner.users.iter().find(|u| u.username == username) {
            return u.id;
        }
        let id = UserId(inner.next_id());
        inner.users.push(User {
            id,
            username: username.to_string(),
        });
        let root = inner.next_id();
        inner.nodes.insert(
            root,
            Node {
                owner: id,
                parent: None,
                name: String::new(),
                deleted: false,
                read_for_all: false,
                audit: AuditInfo::new(id, SystemTime::now()),
                kind: NodeKind::Folder,
            },
        );
        inner.roots.insert(id, root);
        id
    }

    /// Create a folder and any missing ancestors.
    pub fn mkdir_all(&self, owner: UserId, path: &DavPath) -> FsResult<FolderId> {
        let mut inner = self.inner.lock();
        let mut cur = *inner.roots.get(&owner).ok_or(FsError::NotFound)?;
        for seg in path.as_str().split('/').filter(|s| !s.is_empty()) {
            cur = match inner.child_by_name(cur, seg, false) {
                Some(c) => {
                    inner.folder_of(c)?;
                    c
                }
                None => inner.insert_node(owner, cur, seg, owner, NodeKind::Folder),
            };
        }
        Ok(FolderId(cur))
    }

    /// Create or replace a file, bypassing permission and quota checks.
    pub fn put_file(&self, owner: UserId, path: &DavPath, mime_type: &str, data: impl Into<Bytes>) -> FsResult<FileId> {
        self.mkdir_all(owner, &path.parent())?;
        let mut inner = self.inner.lock();
        let parent = inner.lookup(owner, &path.parent(), false)?;
        let name = path.file_name().to_string();
        let body = inner.new_body(owner, 1, mime_type, data.into());
        let id = match inner.child_by_name(parent, &name, false) {
            Some(id) => {
                let n = inner.node_mut(id)?;
                n.kind = NodeKind::File {
                    versioned: false,
                    bodies: vec![body],
                };
                id
            }
            None => inner.insert_node(
                owner,
                parent,
                &name,
                owner,
                NodeKind::File {
                    versioned: false,
                    bodies: vec![body],
                },
            ),
        };
        Ok(FileId(id))
    }

    /// Grant `user` explicit permissions on a resource of `owner`'s
    /// namespace (and, unless overridden, everything below it).
    pub fn set_permissions(&self, owner: UserId, path: &DavPath, user: UserId, perms: Permissions) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let id = inner.lookup(owner, path, true)?;
        inner.acl.insert((id, user), perms);
        Ok(())
    }

    pub fn set_read_for_all(&self, owner: UserId, path: &DavPath, read_for_all: bool) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let id = inner.lookup(owner, path, true)?;
        inner.node_mut(id)?.read_for_all = read_for_all;
        Ok(())
    }

    pub fn set_versioned(&self, owner: UserId, path: &DavPath, versioned: bool) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let id = inner.lookup(owner, path, true)?;
        match &mut inner.node_mut(id)?.kind {
            NodeKind::File { versioned: v, .. } => {
                *v = versioned;
                Ok(())
            }
            NodeKind::Folder => Err(FsError::NotFound),
        }
    }

    /// Limit the total stored bytes of `owner`.
    pub fn set_quota(&self, owner: UserId, bytes: u64) {
        self.inner.lock().quotas.insert(owner, bytes);
    }

    /// Accounting records, oldest first.
    pub fn accounting(&self) -> Vec<Accounting> {
        self.inner.lock().accounting.clone()
    }

    /// Current content of a file, if it exists.
    pub fn contents(&self, owner: UserId, path: &DavPath) -> Option<Bytes> {
        let inner = self.inner.lock();
        let id = inner.lookup(owner, path, false).ok()?;
        match &inner.nodes.get(&id)?.kind {
            NodeKind::File { bodies, .. } => bodies.last().map(|b| b.data.clone()),
            NodeKind::Folder => None,
        }
    }

    /// Does the path resolve to a live resource.
    pub fn exists(&self, owner: UserId, path: &DavPath) -> bool {
        self.inner.lock().lookup(owner, path, false).is_ok()
    }

    /// Total number of nodes, including roots. Handy to assert that an
    /// operation did not mutate anything.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

impl DavUpload for MemUpload {
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()> {
        self.buf.extend_from_slice(&buf);
        future::ready(Ok(())).boxed()
    }

    fn finish(self: Box<Self>) -> FsFuture<'static, UploadedContent> {
        let MemUpload { inner, buf } = *self;
        async move {
            let mut inner = inner.lock();
            let handle = inner.next_id();
            let len = buf.len() as u64;
            inner.uploads.insert(handle, Bytes::from(buf));
            Ok(UploadedContent { handle, len })
        }
        .boxed()
    }
}

impl ResourceStore for MemStore {
    fn find_owner<'a>(&'a self, username: &'a str) -> FsFuture<'a, User> {
        async move {
            trace!("MS: find_owner {username}");
            let inner = self.inner.lock();
            inner
                .users
                .iter()
                .find(|u| u.username == username)
                .cloned()
                .ok_or(FsError::NotFound)
        }
        .boxed()
    }

    fn resource_at_path<'a>(
        &'a self,
        owner: UserId,
        path: &'a DavPath,
        include_deleted: bool,
    ) -> FsFuture<'a, Resource> {
        async move {
            trace!("MS: resource_at_path {owner:?} {path:?}");
            let inner = self.inner.lock();
            let id = inner.lookup(owner, path, include_deleted)?;
            inner.resource(id)
        }
        .boxed()
    }

    fn child_files(
        &self,
        user: UserId,
        folder: FolderId,
        include_deleted: bool,
    ) -> FsFuture<Vec<FileResource>> {
        async move {
            let inner = self.inner.lock();
            inner.folder_of(folder.0)?;
            inner.require(user, folder.0, |p| p.read)?;
            let mut files = Vec::new();
            for c in inner.children(folder.0) {
                if let Ok(f) = inner.file_resource(c) {
                    if include_deleted || !f.deleted {
                        files.push(f);
                    }
                }
            }
            Ok(files)
        }
        .boxed()
    }

    fn file_body(&self, user: UserId, file: FileId, version: u32) -> FsFuture<FileBody> {
        async move {
            let inner = self.inner.lock();
            inner.require(user, file.0, |p| p.read)?;
            match &inner.node(file.0)?.kind {
                NodeKind::File { bodies, .. } => bodies
                    .iter()
                    .find(|b| b.body.version == version)
                    .map(|b| b.body.clone())
                    .ok_or(FsError::NotFound),
                NodeKind::Folder => Err(FsError::NotFound),
            }
        }
        .boxed()
    }

    fn file_contents(
        &self,
        user: UserId,
        file: FileId,
        body: Option<BodyId>,
    ) -> FsFuture<ByteStream> {
        async move {
            trace!("MS: file_contents {file:?} {body:?}");
            let inner = self.inner.lock();
            inner.require(user, file.0, |p| p.read)?;
            let data = match &inner.node(file.0)?.kind {
                NodeKind::File { bodies, .. } => match body {
                    Some(id) => bodies.iter().find(|b| b.body.id == id),
                    None => bodies.last(),
                }
                .map(|b| b.data.clone())
                .ok_or(FsError::NotFound)?,
                NodeKind::Folder => return Err(FsError::NotFound),
            };
            let chunks: Vec<Bytes> = (0..data.len())
                .step_by(CHUNK_SIZE)
                .map(|start| data.slice(start..std::cmp::min(start + CHUNK_SIZE, data.len())))
                .collect();
            Ok(stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>)).boxed())
        }
        .boxed()
    }

    fn open_upload(&self, _user: UserId) -> FsFuture<Box<dyn DavUpload>> {
        let upload = MemUpload {
            inner: self.inner.clone(),
            buf: Vec::new(),
        };
        future::ready(Ok(Box::new(upload) as Box<dyn DavUpload>)).boxed()
    }

    fn create_file<'a>(
        &'a self,
        user: UserId,
        folder: FolderId,
        name: &'a str,
        mime_type: &'a str,
        content: UploadedContent,
    ) -> FsFuture<'a, FileResource> {
        async move {
            trace!("MS: create_file {folder:?} {name}");
            let mut inner = self.inner.lock();
            let data = inner.take_upload(content)?;
            inner.folder_of(folder.0)?;
            inner.require(user, folder.0, |p| p.write)?;
            inner.check_unique(folder.0, name)?;
            let owner = inner.node(folder.0)?.owner;
            inner.check_quota(owner, data.len() as u64)?;
            let body = inner.new_body(user, 1, mime_type, data);
            let id = inner.insert_node(
                owner,
                folder.0,
                name,
                user,
                NodeKind::File {
                    versioned: false,
                    bodies: vec![body],
                },
            );
            inner.file_resource(id)
        }
        .boxed()
    }

    fn update_file_contents<'a>(
        &'a self,
        user: UserId,
        file: FileId,
        mime_type: &'a str,
        content: UploadedContent,
    ) -> FsFuture<'a, FileResource> {
        async move {
            trace!("MS: update_file_contents {file:?}");
            let mut inner = self.inner.lock();
            let data = inner.take_upload(content)?;
            inner.require(user, file.0, |p| p.write)?;
            let owner = inner.node(file.0)?.owner;
            let (versioned, last_version, old_len) = match &inner.node(file.0)?.kind {
                NodeKind::File { versioned, bodies } => (
                    *versioned,
                    bodies.last().map(|b| b.body.version).unwrap_or(0),
                    bodies.iter().map(|b| b.data.len() as u64).sum::<u64>(),
                ),
                NodeKind::Folder => return Err(FsError::NotFound),
            };
            let extra = if versioned {
                data.len() as u64
            } else {
                (data.len() as u64).saturating_sub(old_len)
            };
            inner.check_quota(owner, extra)?;
            let version = if versioned { last_version + 1 } else { 1 };
            let body = inner.new_body(user, version, mime_type, data);
            let n = inner.node_mut(file.0)?;
            if let NodeKind::File { bodies, .. } = &mut n.kind {
                if !versioned {
                    bodies.clear();
                }
                bodies.push(body);
            }
            n.audit.modified_by = user;
            n.audit.modification_date = SystemTime::now();
            inner.file_resource(file.0)
        }
        .boxed()
    }

    fn create_folder<'a>(
        &'a self,
        user: UserId,
        parent: FolderId,
        name: &'a str,
    ) -> FsFuture<'a, FolderResource> {
        async move {
            trace!("MS: create_folder {parent:?} {name}");
            let mut inner = self.inner.lock();
            inner.folder_of(parent.0)?;
            inner.require(user, parent.0, |p| p.write)?;
            inner.check_unique(parent.0, name)?;
            let owner = inner.node(parent.0)?.owner;
            let id = inner.insert_node(owner, parent.0, name, user, NodeKind::Folder);
            inner.folder_resource(id)
        }
        .boxed()
    }

    fn delete_file(&self, user: UserId, file: FileId) -> FsFuture<()> {
        async move {
            trace!("MS: delete_file {file:?}");
            let mut inner = self.inner.lock();
            inner.file_resource(file.0)?;
            inner.require(user, file.0, |p| p.delete)?;
            inner.remove_tree(file.0);
            Ok(())
        }
        .boxed()
    }

    fn delete_folder(&self, user: UserId, folder: FolderId) -> FsFuture<()> {
        async move {
            trace!("MS: delete_folder {folder:?}");
            let mut inner = self.inner.lock();
            let n = inner.node(folder.0)?;
            if n.parent.is_none() || !matches!(n.kind, NodeKind::Folder) {
                return Err(FsError::InsufficientPermissions);
            }
            inner.require(user, folder.0, |p| p.delete)?;
            inner.remove_tree(folder.0);
            Ok(())
        }
        .boxed()
    }

    fn copy_file<'a>(
        &'a self,
        user: UserId,
        file: FileId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, FileResource> {
        async move {
            trace!("MS: copy_file {file:?} -> {dest:?}");
            let mut inner = self.inner.lock();
            inner.require(user, file.0, |p| p.read)?;
            let (parent, name) = inner.dest_parent(dest_owner, dest)?;
            inner.require(user, parent, |p| p.write)?;
            let (versioned, body) = match &inner.node(file.0)?.kind {
                NodeKind::File { versioned, bodies } => (
                    *versioned,
                    bodies.last().cloned().ok_or(FsError::NotFound)?,
                ),
                NodeKind::Folder => return Err(FsError::NotFound),
            };
            inner.check_quota(dest_owner, body.data.len() as u64)?;
            let body = inner.new_body(user, 1, &body.body.mime_type, body.data);
            let id = inner.insert_node(
                dest_owner,
                parent,
                &name,
                user,
                NodeKind::File {
                    versioned,
                    bodies: vec![body],
                },
            );
            inner.file_resource(id)
        }
        .boxed()
    }

    fn copy_folder<'a>(
        &'a self,
        user: UserId,
        folder: FolderId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, FolderResource> {
        async move {
            trace!("MS: copy_folder {folder:?} -> {dest:?}");
            let mut inner = self.inner.lock();
            inner.folder_of(folder.0)?;
            inner.require(user, folder.0, |p| p.read)?;
            let (parent, name) = inner.dest_parent(dest_owner, dest)?;
            inner.require(user, parent, |p| p.write)?;
            let id = inner.insert_node(dest_owner, parent, &name, user, NodeKind::Folder);
            inner.folder_resource(id)
        }
        .boxed()
    }

    fn move_file_to_path<'a>(
        &'a self,
        user: UserId,
        file: FileId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, ()> {
        async move {
            trace!("MS: move_file {file:?} -> {dest:?}");
            let mut inner = self.inner.lock();
            inner.file_resource(file.0)?;
            inner.require(user, file.0, |p| p.delete)?;
            let (parent, name) = inner.dest_parent(dest_owner, dest)?;
            inner.require(user, parent, |p| p.write)?;
            let n = inner.node_mut(file.0)?;
            n.parent = Some(parent);
            n.name = name;
            n.owner = dest_owner;
            Ok(())
        }
        .boxed()
    }

    fn move_folder_to_path<'a>(
        &'a self,
        user: UserId,
        folder: FolderId,
        dest_owner: UserId,
        dest: &'a DavPath,
    ) -> FsFuture<'a, ()> {
        async move {
            trace!("MS: move_folder {folder:?} -> {dest:?}");
            let mut inner = self.inner.lock();
            let n = inner.node(folder.0)?;
            if n.parent.is_none() {
                return Err(FsError::InsufficientPermissions);
            }
            inner.require(user, folder.0, |p| p.delete)?;
            let (parent, name) = inner.dest_parent(dest_owner, dest)?;
            // refuse to move a folder below itself.
            let mut cur = Some(parent);
            while let Some(c) = cur {
                if c == folder.0 {
                    return Err(FsError::InsufficientPermissions);
                }
                cur = inner.nodes.get(&c).and_then(|n| n.parent);
            }
            inner.require(user, parent, |p| p.write)?;
            let mut stack = vec![folder.0];
            while let Some(id) = stack.pop() {
                stack.extend(inner.children(id));
                inner.node_mut(id)?.owner = dest_owner;
            }
            let n = inner.node_mut(folder.0)?;
            n.parent = Some(parent);
            n.name = name;
            Ok(())
        }
        .boxed()
    }

    fn trash_file(&self, user: UserId, file: FileId) -> FsFuture<()> {
        async move {
            let mut inner = self.inner.lock();
            inner.file_resource(file.0)?;
            inner.set_deleted(user, file.0, true)
        }
        .boxed()
    }

    fn trash_folder(&self, user: UserId, folder: FolderId) -> FsFuture<()> {
        async move {
            let mut inner = self.inner.lock();
            inner.folder_of(folder.0)?;
            if inner.node(folder.0)?.parent.is_none() {
                return Err(FsError::InsufficientPermissions);
            }
            inner.set_deleted(user, folder.0, true)
        }
        .boxed()
    }

    fn restore_file(&self, user: UserId, file: FileId) -> FsFuture<()> {
        async move {
            let mut inner = self.inner.lock();
            inner.file_resource(file.0)?;
            inner.set_deleted(user, file.0, false)
        }
        .boxed()
    }

    fn restore_folder(&self, user: UserId, folder: FolderId) -> FsFuture<()> {
        async move {
            let mut inner = self.inner.lock();
            inner.folder_of(folder.0)?;
            inner.set_deleted(user, folder.0, false)
        }
        .boxed()
    }

    fn can_read_folder(&self, user: UserId, folder: FolderId) -> FsFuture<bool> {
        let inner = self.inner.lock();
        let ok = inner.folder_of(folder.0).is_ok() && inner.permissions(user, folder.0).read;
        future::ready(Ok(ok)).boxed()
    }

    fn permissions<'a>(&'a self, user: UserId, resource: &'a Resource) -> FsFuture<'a, Permissions> {
        let id = match resource {
            Resource::File(f) => f.id.0,
            Resource::Folder(f) => f.id.0,
        };
        let perms = self.inner.lock().permissions(user, id);
        future::ready(Ok(perms)).boxed()
    }

    fn update_accounting(&self, owner: UserId, when: SystemTime, bytes: u64) {
        trace!("MS: update_accounting {owner:?} {bytes}");
        self.inner.lock().accounting.push(Accounting { owner, when, bytes });
    }
}
