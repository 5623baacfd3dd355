//! A minimal boxed-future alias for user-supplied async callbacks
//! (Design Note "User-supplied async callbacks"), avoiding a dependency
//! on an executor-agnostic futures crate the corpus does not otherwise
//! reach for.

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
