pub mod db;
pub mod files;
pub mod metadata;
pub mod models;
pub mod schema;
pub mod vector;

mod error;

pub use error::{Error, Result};

use std::{future::Future, pin::Pin};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
