//! Decorator composition.
//!
//! `compose(base, [A, B, C])` dispatches a request as `A → B → C → base`:
//! the first decorator listed is the outermost one.

use std::sync::Arc;

use crate::transport::{SharedTransport, Transport};

/// Wraps the next transport in the chain with additional behavior.
pub trait Decorator: Send + Sync {
    fn decorate(&self, next: SharedTransport) -> SharedTransport;
}

/// Decorator backed by a closure.
pub struct DecoratorFn<F> {
    f: F,
}

/// Build a decorator from a closure over the next transport.
pub fn decorator_fn<F>(f: F) -> DecoratorFn<F>
where
    F: Fn(SharedTransport) -> SharedTransport + Send + Sync,
{
    DecoratorFn { f }
}

impl<F> Decorator for DecoratorFn<F>
where
    F: Fn(SharedTransport) -> SharedTransport + Send + Sync,
{
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        (self.f)(next)
    }
}

impl<D: Decorator + ?Sized> Decorator for Arc<D> {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        (**self).decorate(next)
    }
}

impl<D: Decorator + ?Sized> Decorator for Box<D> {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        (**self).decorate(next)
    }
}

/// Nest `base` inside `decorators`, applied right-to-left.
pub fn compose<T, I, D>(base: T, decorators: I) -> SharedTransport
where
    T: Transport + 'static,
    I: IntoIterator<Item = D>,
    I::IntoIter: DoubleEndedIterator,
    D: Decorator,
{
    decorators
        .into_iter()
        .rev()
        .fold(Arc::new(base) as SharedTransport, |next, d| d.decorate(next))
}

/// Incremental form of [`compose`]. Layers added first end up outermost.
pub struct Pipeline {
    base: SharedTransport,
    layers: Vec<Box<dyn Decorator>>,
}

impl Pipeline {
    pub fn new<T: Transport + 'static>(base: T) -> Self {
        Self {
            base: Arc::new(base),
            layers: Vec::new(),
        }
    }

    /// Start from an already shared transport.
    pub fn from_shared(base: SharedTransport) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    /// Add a decorator inside the ones already added.
    pub fn layer<D: Decorator + 'static>(mut self, decorator: D) -> Self {
        self.layers.push(Box::new(decorator));
        self
    }

    /// Add a decorator only when `decorator` is `Some`.
    pub fn layer_opt<D: Decorator + 'static>(self, decorator: Option<D>) -> Self {
        match decorator {
            Some(d) => self.layer(d),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn build(self) -> SharedTransport {
        self.layers
            .into_iter()
            .rev()
            .fold(self.base, |next, d| d.decorate(next))
    }
}
