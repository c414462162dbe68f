//! # Locate
//!
//! This module covers finding the patch target and remembering it once found

pub mod signature;

use log::{debug, error};
use thiserror::Error;

use crate::scan::image::ImageError;

/// Errors while locating a patch target
#[derive(Debug, Error)]
pub enum LocateError {
    /// The code region to scan could not be determined
    #[error("{0}")]
    Image(#[from] ImageError),
    /// None of the known signatures are present in the scanned region
    #[error("Failed to locate patch pattern")]
    PatternNotFound,
}

/// Strategy for finding the absolute address of a patch target
///
/// Implementations may be arbitrarily expensive; [`Resolver`] makes sure a successful lookup only happens once.
pub trait Locator {
    /// Returns the address of the first byte to patch
    fn locate(&self) -> Result<usize, LocateError>;
}
impl<F> Locator for F
where
    F: Fn() -> Result<usize, LocateError>,
{
    fn locate(&self) -> Result<usize, LocateError> {
        self()
    }
}

/// Lazily resolves a target through a [`Locator`] and caches it.
///
/// Only successes are cached, so a failed lookup is retried on the next call. Once resolved the address never changes.
#[derive(Debug)]
pub struct Resolver<L: Locator> {
    /// Strategy used until the first success
    locator: L,
    /// Cached target
    target: Option<usize>,
}
impl<L: Locator> Resolver<L> {
    /// Creates an unresolved resolver
    pub fn new(locator: L) -> Self {
        Self {
            locator,
            target: None,
        }
    }

    /// Returns the cached target, locating it first if needed
    pub fn resolve(&mut self) -> Result<usize, LocateError> {
        if let Some(target) = self.target {
            return Ok(target);
        }
        match self.locator.locate() {
            Ok(target) => {
                debug!("patch target resolved at {:#x}", target);
                self.target = Some(target);
                Ok(target)
            }
            Err(e) => {
                error!("failed to resolve patch target: {}", e);
                Err(e)
            }
        }
    }

    /// Returns the cached target without attempting to locate it
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    /// Returns the underlying locator
    pub fn locator(&self) -> &L {
        &self.locator
    }
}
