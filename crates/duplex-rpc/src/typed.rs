//! Typed handlers and calls.
//!
//! Handlers are plain closures taking 0 to 4 deserializable parameters.
//! Async closures register with [`RpcProcessor::on`]; blocking closures
//! register with [`RpcProcessor::on_sync`] and run on tokio's blocking pool.
//!
//! ```ignore
//! processor.on("Add", |a: i64, b: i64| async move { Ok::<_, anyhow::Error>(a + b) })?;
//! let sum: i64 = processor.call("Add", (10, 301)).await?;
//! ```
//!
//! Inbound parameters are checked in order: arity, then each positional
//! value, then the handler runs and its return value is encoded.

use crate::domain::error::RpcError;
use crate::domain::registry::BoxedHandler;
use crate::processor::RpcProcessor;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

/// Async closure usable as a handler. `Args` is the tuple of parameter types.
pub trait Handler<Args>: Send + Sync + 'static {
    fn into_boxed(self, method: &str) -> BoxedHandler;
}

/// Blocking closure usable as a handler. `Args` is the tuple of parameter types.
pub trait SyncHandler<Args>: Send + Sync + 'static {
    fn into_boxed(self, method: &str) -> BoxedHandler;
}

/// Arguments of an outbound call: a tuple of 0 to 4 serializable values.
pub trait IntoParams {
    fn into_params(self, method: &str) -> Result<Vec<Value>, RpcError>;
}

/// Positional parameters of one inbound request.
struct Params {
    method: Arc<str>,
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl Params {
    fn new(method: Arc<str>, values: Vec<Value>, expected: usize) -> Result<Self, RpcError> {
        if values.len() != expected {
            return Err(RpcError::ArityMismatch {
                method: method.to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            method,
            values: values.into_iter(),
            index: 0,
        })
    }

    fn decode_next<T: DeserializeOwned>(&mut self) -> Result<T, RpcError> {
        let index = self.index;
        self.index += 1;

        let value = self.values.next().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|_| RpcError::ParameterTypeMismatch {
            index,
            method: self.method.to_string(),
            expected_type: type_name::<T>(),
        })
    }
}

fn encode_result<R: Serialize>(method: &str, result: R) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|source| RpcError::Encode {
        method: method.to_string(),
        source,
    })
}

fn encode_arg<T: Serialize>(method: &str, arg: T) -> Result<Value, RpcError> {
    serde_json::to_value(arg).map_err(|source| RpcError::Encode {
        method: method.to_string(),
        source,
    })
}

macro_rules! impl_handlers {
    ($count:expr; $($arg:ident: $ty:ident),*) => {
        impl<F, Fut, R, E, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + Send + 'static,
            E: Into<anyhow::Error> + Send + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn into_boxed(self, method: &str) -> BoxedHandler {
                let method: Arc<str> = Arc::from(method);
                let f = Arc::new(self);
                Arc::new(move |values: Vec<Value>| {
                    let method = Arc::clone(&method);
                    let f = Arc::clone(&f);
                    async move {
                        #[allow(unused_mut, unused_variables)]
                        let mut params = Params::new(Arc::clone(&method), values, $count)?;
                        $(let $arg: $ty = params.decode_next()?;)*
                        let result = f($($arg),*).await.map_err(Into::<anyhow::Error>::into)?;
                        Ok::<Value, anyhow::Error>(encode_result(&method, result)?)
                    }
                    .boxed()
                })
            }
        }

        impl<F, R, E, $($ty,)*> SyncHandler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Result<R, E> + Send + Sync + 'static,
            R: Serialize + Send + 'static,
            E: Into<anyhow::Error> + Send + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn into_boxed(self, method: &str) -> BoxedHandler {
                let method: Arc<str> = Arc::from(method);
                let f = Arc::new(self);
                Arc::new(move |values: Vec<Value>| {
                    let method = Arc::clone(&method);
                    let f = Arc::clone(&f);
                    async move {
                        #[allow(unused_mut, unused_variables)]
                        let mut params = Params::new(Arc::clone(&method), values, $count)?;
                        $(let $arg: $ty = params.decode_next()?;)*
                        let outcome = tokio::task::spawn_blocking(move || f($($arg),*)).await;
                        let result = match outcome {
                            Ok(result) => result.map_err(Into::<anyhow::Error>::into)?,
                            // Re-raised so the dispatcher reports it like any other panic
                            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                            Err(join) => return Err(anyhow::anyhow!("Handler for method '{method}' was cancelled: {join}")),
                        };
                        Ok::<Value, anyhow::Error>(encode_result(&method, result)?)
                    }
                    .boxed()
                })
            }
        }

        impl<$($ty: Serialize,)*> IntoParams for ($($ty,)*) {
            #[allow(unused_variables)]
            fn into_params(self, method: &str) -> Result<Vec<Value>, RpcError> {
                let ($($arg,)*) = self;
                Ok(vec![$(encode_arg(method, $arg)?),*])
            }
        }
    };
}

impl_handlers!(0;);
impl_handlers!(1; a: A);
impl_handlers!(2; a: A, b: B);
impl_handlers!(3; a: A, b: B, c: C);
impl_handlers!(4; a: A, b: B, c: C, d: D);

impl RpcProcessor {
    /// Register an async typed handler.
    ///
    /// Fails with `DuplicateHandler` if `method` is already registered.
    pub fn on<Args, H>(&self, method: &str, handler: H) -> Result<(), RpcError>
    where
        H: Handler<Args>,
    {
        self.register(method, handler.into_boxed(method))
    }

    /// Register a blocking typed handler. It runs on the blocking thread pool.
    pub fn on_sync<Args, H>(&self, method: &str, handler: H) -> Result<(), RpcError>
    where
        H: SyncHandler<Args>,
    {
        self.register(method, handler.into_boxed(method))
    }

    /// Call `method` on the remote side and decode its result into `R`.
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R, RpcError>
    where
        A: IntoParams,
        R: DeserializeOwned,
    {
        let params = args.into_params(method)?;
        let value = self.invoke_remote(method, params).await?;

        serde_json::from_value(value).map_err(|_| RpcError::ReturnTypeMismatch {
            method: method.to_string(),
            expected_type: type_name::<R>(),
        })
    }
}
