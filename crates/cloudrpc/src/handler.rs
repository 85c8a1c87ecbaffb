//! # Handlers
//!
//! An `RpcHandler` exposes the methods of one logical type under a wire type
//! identifier. Methods are keyed by `(name, arity)`, so overloads with
//! different argument counts coexist.
//!
//! ## Targets
//!
//! A method runs against a target instance. The instance comes either from the
//! invocation context (the result of the previous frame of a chain) or from the
//! instance bound to the handler at registration. Which one is allowed is
//! decided by `strict_instance_usage`:
//!
//! - strict: only the context instance; a missing one is a failure.
//! - lenient: the context instance if present, else the bound instance.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cloudpack::Decoder;
use cloudpack::Encoder;
use cloudpack::Pack;
use cloudpack::Unpack;

use crate::invoke::HandlingResult;
use crate::invoke::InvocationContext;
use crate::RemoteFailure;

/// A target instance as seen by the dispatch machinery.
pub type Target = Arc<dyn Any + Send + Sync>;

/// A value returned by a method, packable into a reply and reusable as the
/// target of the next chain frame.
pub trait RpcObject: Any + Send + Sync {
    fn pack_into(&self, enc: &mut Encoder) -> cloudpack::Result<()>;
    fn into_target(self: Arc<Self>) -> Target;
}

impl<T: Pack + Any + Send + Sync> RpcObject for T {
    fn pack_into(&self, enc: &mut Encoder) -> cloudpack::Result<()> {
        self.pack(enc)
    }

    fn into_target(self: Arc<Self>) -> Target {
        self
    }
}

/// What a successful method produced.
#[derive(Clone)]
pub enum Reply {
    Void,
    Value(Arc<dyn RpcObject>),
}

impl Reply {
    pub fn is_void(&self) -> bool {
        matches!(self, Reply::Void)
    }

    pub(crate) fn as_target(&self) -> Option<Target> {
        match self {
            Reply::Void => None,
            Reply::Value(value) => Some(value.clone().into_target()),
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Void => f.write_str("Void"),
            Reply::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// Cursor over the arguments of one call.
pub struct Args<'a> {
    dec: Decoder<'a>,
    normalize: bool,
}

impl<'a> Args<'a> {
    pub(crate) fn new(dec: Decoder<'a>, normalize: bool) -> Self {
        Self { dec, normalize }
    }

    /// Reads the next argument. With normalization on, numeric arguments are
    /// coerced to `T` when the value fits.
    pub fn next<T: Unpack>(&mut self) -> Result<T, RemoteFailure> {
        let value = if self.normalize {
            T::unpack_normalized(&mut self.dec)?
        } else {
            T::unpack(&mut self.dec)?
        };
        Ok(value)
    }

    pub fn str(&mut self) -> Result<&'a str, RemoteFailure> {
        Ok(self.dec.str()?)
    }

    pub fn is_empty(&self) -> bool {
        self.dec.is_empty()
    }
}

type Invoke = dyn Fn(&(dyn Any + Send + Sync), &mut Args<'_>) -> Result<Reply, RemoteFailure> + Send + Sync;

pub struct MethodDescriptor {
    pub name: String,
    pub arity: usize,
    pub void: bool,
    invoke: Box<Invoke>,
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("void", &self.void)
            .finish()
    }
}

pub struct RpcHandler {
    type_name: String,
    bound: Option<Target>,
    methods: HashMap<(String, usize), MethodDescriptor>,
}

impl RpcHandler {
    pub fn builder<T: Any + Send + Sync>(type_name: impl Into<String>) -> HandlerBuilder<T> {
        HandlerBuilder {
            type_name: type_name.into(),
            bound: None,
            methods: HashMap::new(),
            _target: PhantomData,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method(&self, name: &str, arity: usize) -> Option<&MethodDescriptor> {
        self.methods.get(&(name.to_string(), arity))
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    /// Executes the method described by `ctx`. Never panics; handler panics
    /// and argument decoding errors are reported as failures.
    pub fn handle(&self, ctx: InvocationContext<'_>) -> HandlingResult {
        // every argument, optional ones included, is exactly one codec item
        let arity = match ctx.args.count_items() {
            Ok(arity) => arity,
            Err(e) => return HandlingResult::Failure(e.into()),
        };
        let Some(descriptor) = self.methods.get(&(ctx.method.to_string(), arity)) else {
            return HandlingResult::Failure(RemoteFailure::method_not_found(&self.type_name, ctx.method, arity));
        };

        let target = if ctx.strict_instance_usage {
            ctx.target
        } else {
            ctx.target.or_else(|| self.bound.clone())
        };
        let Some(target) = target else {
            return HandlingResult::Failure(RemoteFailure::no_instance(&self.type_name, ctx.method));
        };

        let mut args = Args::new(ctx.args, ctx.normalize_primitives);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            (descriptor.invoke)(&*target, &mut args)
        }));

        match outcome {
            Ok(Ok(reply)) => HandlingResult::Success(reply),
            Ok(Err(failure)) => HandlingResult::Failure(failure),
            Err(panic) => HandlingResult::Failure(RemoteFailure::panicked(&*panic)),
        }
    }
}

impl std::fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcHandler")
            .field("type_name", &self.type_name)
            .field("bound", &self.bound.is_some())
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builds an `RpcHandler` whose methods operate on `&T`.
pub struct HandlerBuilder<T> {
    type_name: String,
    bound: Option<Target>,
    methods: HashMap<(String, usize), MethodDescriptor>,
    _target: PhantomData<fn(&T)>,
}

impl<T: Any + Send + Sync> HandlerBuilder<T> {
    /// Binds the fallback instance used by non-strict invocations.
    pub fn bind(mut self, instance: Arc<T>) -> Self {
        self.bound = Some(instance);
        self
    }

    pub fn method<R, F>(self, name: &str, arity: usize, f: F) -> Self
    where
        R: Pack + Any + Send + Sync,
        F: Fn(&T, &mut Args<'_>) -> Result<R, RemoteFailure> + Send + Sync + 'static,
    {
        let owner = self.type_name.clone();
        let method = name.to_string();
        self.insert(name, arity, false, Box::new(move |target: &(dyn Any + Send + Sync), args: &mut Args<'_>| -> Result<Reply, RemoteFailure> {
            let this = target
                .downcast_ref::<T>()
                .ok_or_else(|| RemoteFailure::wrong_instance(&owner, &method))?;
            let value = f(this, args)?;
            Ok(Reply::Value(Arc::new(value)))
        }))
    }

    pub fn void_method<F>(self, name: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&T, &mut Args<'_>) -> Result<(), RemoteFailure> + Send + Sync + 'static,
    {
        let owner = self.type_name.clone();
        let method = name.to_string();
        self.insert(name, arity, true, Box::new(move |target: &(dyn Any + Send + Sync), args: &mut Args<'_>| -> Result<Reply, RemoteFailure> {
            let this = target
                .downcast_ref::<T>()
                .ok_or_else(|| RemoteFailure::wrong_instance(&owner, &method))?;
            f(this, args)?;
            Ok(Reply::Void)
        }))
    }

    fn insert(mut self, name: &str, arity: usize, void: bool, invoke: Box<Invoke>) -> Self {
        let descriptor = MethodDescriptor { name: name.to_string(), arity, void, invoke };
        self.methods.insert((name.to_string(), arity), descriptor);
        self
    }

    pub fn build(self) -> RpcHandler {
        RpcHandler {
            type_name: self.type_name,
            bound: self.bound,
            methods: self.methods,
        }
    }
}
