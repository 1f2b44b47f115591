// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Message bodies.
//!
//! An [`Entity`] is an abstract byte source attached to a request or
//! response. Construction from memory or from a file yields a restartable
//! entity with a known size; construction from a generic reader yields a
//! single-shot entity of unknown size that is consumed at most once.

use std::fmt;
use std::fs;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The body of a message.
pub struct Entity {
    inner: Inner,
}

enum Inner {
    Empty,
    Bytes(Arc<Vec<u8>>),
    File { path: PathBuf, len: u64 },
    Stream(Mutex<Option<Box<dyn Read + Send>>>),
}

impl Entity {
    /// An entity with no bytes.
    #[inline]
    pub fn empty() -> Entity {
        Entity { inner: Inner::Empty }
    }

    /// An in-memory entity. Restartable, size known.
    #[inline]
    pub fn from_bytes<D>(data: D) -> Entity
    where
        D: Into<Vec<u8>>,
    {
        Entity {
            inner: Inner::Bytes(Arc::new(data.into())),
        }
    }

    /// A UTF-8 text entity.
    #[inline]
    pub fn from_string<S>(data: S) -> Entity
    where
        S: Into<String>,
    {
        Entity::from_bytes(data.into().into_bytes())
    }

    /// An entity backed by a file. The length is recorded now; the file is
    /// opened each time a reader is taken, so the entity restarts cleanly.
    pub fn from_file<P>(path: P) -> io::Result<Entity>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let len = fs::metadata(&path)?.len();
        Ok(Entity {
            inner: Inner::File { path, len },
        })
    }

    /// A single-shot entity streaming from `reader`. Size unknown.
    pub fn from_reader<R>(reader: R) -> Entity
    where
        R: Read + Send + 'static,
    {
        Entity {
            inner: Inner::Stream(Mutex::new(Some(Box::new(reader)))),
        }
    }

    /// The size in bytes, when known at construction time.
    pub fn known_size(&self) -> Option<u64> {
        match &self.inner {
            Inner::Empty => Some(0),
            Inner::Bytes(data) => Some(data.len() as u64),
            Inner::File { len, .. } => Some(*len),
            Inner::Stream(_) => None,
        }
    }

    /// True if a reader can be taken more than once.
    pub fn is_restartable(&self) -> bool {
        !matches!(self.inner, Inner::Stream(_))
    }

    /// True if the entity is known to carry zero bytes.
    pub fn is_known_empty(&self) -> bool {
        self.known_size() == Some(0)
    }

    /// Takes a reader over the decoded bytes.
    ///
    /// For a single-shot entity the second call yields an empty reader; the
    /// bytes are gone.
    pub fn reader(&self) -> io::Result<EntityReader> {
        match &self.inner {
            Inner::Empty => Ok(EntityReader::Empty),
            Inner::Bytes(data) => Ok(EntityReader::Bytes {
                data: data.clone(),
                pos: 0,
            }),
            Inner::File { path, .. } => Ok(EntityReader::Stream(Box::new(fs::File::open(path)?))),
            Inner::Stream(slot) => {
                let taken = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
                match taken {
                    Some(reader) => Ok(EntityReader::Stream(reader)),
                    None => Ok(EntityReader::Empty),
                }
            }
        }
    }

    /// Collects the whole entity into memory, up to `limit` bytes.
    ///
    /// Exceeding the limit returns `InvalidData`; callers translate that to
    /// their own body-too-large error.
    pub fn read_to_bytes(&self, limit: u64) -> io::Result<Vec<u8>> {
        let mut reader = self.reader()?;
        let mut out = Vec::new();
        let read = (&mut reader).take(limit + 1).read_to_end(&mut out)? as u64;
        if read > limit {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "entity over limit"));
        }
        Ok(out)
    }
}

impl Clone for Entity {
    /// Restartable entities clone cheaply. Cloning a single-shot entity
    /// yields a spent one: the stream stays with the original.
    fn clone(&self) -> Entity {
        match &self.inner {
            Inner::Empty => Entity { inner: Inner::Empty },
            Inner::Bytes(data) => Entity {
                inner: Inner::Bytes(data.clone()),
            },
            Inner::File { path, len } => Entity {
                inner: Inner::File {
                    path: path.clone(),
                    len: *len,
                },
            },
            Inner::Stream(_) => Entity {
                inner: Inner::Stream(Mutex::new(None)),
            },
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Entity::Empty"),
            Inner::Bytes(data) => write!(f, "Entity::Bytes({} bytes)", data.len()),
            Inner::File { path, len } => write!(f, "Entity::File({:?}, {} bytes)", path, len),
            Inner::Stream(_) => f.write_str("Entity::Stream"),
        }
    }
}

impl Default for Entity {
    #[inline]
    fn default() -> Entity {
        Entity::empty()
    }
}

/// Reader over an entity's decoded bytes.
pub enum EntityReader {
    Empty,
    Bytes { data: Arc<Vec<u8>>, pos: usize },
    Stream(Box<dyn Read + Send>),
}

impl Read for EntityReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntityReader::Empty => Ok(0),
            EntityReader::Bytes { data, pos } => {
                let remaining = &data[*pos..];
                let n = remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                *pos += n;
                Ok(n)
            }
            EntityReader::Stream(reader) => reader.read(buf),
        }
    }
}
