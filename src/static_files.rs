// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Static file serving.
//!
//! A [`FileServer`] answers paths resolved strictly inside its root
//! directory; anything that escapes, does not exist, or is not a regular
//! file is a `404`. MIME tables are an external concern: plug one in with
//! [`FileServer::with_media_types`] or responses go out untyped.

use std::path::{Path, PathBuf};

use log::trace;

use crate::entity::Entity;
use crate::error::Result;
use crate::headers::Header;
use crate::message::Message;
use crate::response::HttpResponse;

/// Maps file paths to `Content-Type` values. Deliberately external; this
/// library ships no MIME table.
pub trait MediaTypeResolver: Send + Sync {
    fn content_type(&self, path: &Path) -> Option<String>;
}

impl<F> MediaTypeResolver for F
where
    F: Fn(&Path) -> Option<String> + Send + Sync,
{
    fn content_type(&self, path: &Path) -> Option<String> {
        self(path)
    }
}

/// Serves files rooted at one directory.
pub struct FileServer {
    directory: PathBuf,
    media_types: Option<Box<dyn MediaTypeResolver>>,
}

impl FileServer {
    pub fn new(directory: impl Into<PathBuf>) -> FileServer {
        FileServer {
            directory: directory.into(),
            media_types: None,
        }
    }

    pub fn with_media_types<R>(mut self, resolver: R) -> FileServer
    where
        R: MediaTypeResolver + 'static,
    {
        self.media_types = Some(Box::new(resolver));
        self
    }

    /// Serves the (already percent-decoded) path relative to the root.
    pub fn serve(&self, relative: &str) -> Result<HttpResponse> {
        let resolved = match self.resolve(relative) {
            Some(path) => path,
            None => {
                trace!("file request escaped or missed: {}", relative);
                return Ok(HttpResponse::empty(404));
            }
        };

        let entity = match Entity::from_file(&resolved) {
            Ok(entity) => entity,
            Err(_) => return Ok(HttpResponse::empty(404)),
        };

        let mut response = HttpResponse::empty(200).with_entity(entity);
        if let Some(resolver) = &self.media_types {
            if let Some(content_type) = resolver.content_type(&resolved) {
                response = response.with_set_header(Header::new("Content-Type", content_type)?);
            }
        }
        Ok(response)
    }

    // Canonical containment check: the resolved file must stay inside the
    // canonical root.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        if relative.contains('\0') {
            return None;
        }

        let mut candidate = self.directory.clone();
        for piece in relative.split('/') {
            match piece {
                "" | "." => {}
                ".." => return None,
                piece => candidate.push(piece),
            }
        }

        let root = self.directory.canonicalize().ok()?;
        let resolved = candidate.canonicalize().ok()?;
        if !resolved.starts_with(&root) || !resolved.is_file() {
            return None;
        }
        Some(resolved)
    }
}
