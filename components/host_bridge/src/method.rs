//! Method overload sets.
//!
//! An [`OverloadSet`] holds every signature registered under one name.
//! Invocation tries them in registration order; the first signature whose
//! parameters all translate is called.

use crate::bridge::Bridge;
use crate::convert::{HostArgs, IntoHost};
use crate::error::{BridgeError, BridgeResult};
use crate::translator;
use crate::types::{HostObject, HostType, HostValue};
use core_types::Value;
use std::fmt;
use std::sync::Arc;

/// Type-erased host call: receives the bound host object, if any, and the
/// translated arguments.
pub(crate) type Invoker =
    Arc<dyn Fn(Option<&HostObject>, Vec<HostValue>) -> BridgeResult<HostValue> + Send + Sync>;

/// One callable signature.
#[derive(Clone)]
pub struct Signature {
    params: Vec<HostType>,
    varargs: bool,
    invoker: Invoker,
}

fn host_failure(method: &str) -> impl Fn(crate::error::HostError) -> BridgeError + '_ {
    move |source| BridgeError::HostMethod {
        method: method.to_string(),
        source,
    }
}

impl Signature {
    /// Parameter types in order.
    pub fn params(&self) -> &[HostType] {
        &self.params
    }

    /// Returns true if the last parameter collects trailing arguments.
    pub fn is_varargs(&self) -> bool {
        self.varargs
    }

    fn of<A: HostArgs>(invoker: Invoker) -> Self {
        Signature {
            params: A::param_types(),
            varargs: A::is_varargs(),
            invoker,
        }
    }

    /// A method bound to an instance of `T`.
    pub(crate) fn instance<T, A, R, F>(name: &str, f: F) -> Self
    where
        T: crate::class::HostClass,
        A: HostArgs,
        R: IntoHost,
        F: Fn(&T, A) -> R + Send + Sync + 'static,
    {
        let name = name.to_string();
        Self::of::<A>(Arc::new(move |this, values| {
            let this = this
                .and_then(HostObject::downcast_ref::<T>)
                .ok_or_else(|| BridgeError::incompatible(std::any::type_name::<T>(), "unbound receiver"))?;
            let args = A::from_values(values)?;
            f(this, args).into_host().map_err(host_failure(&name))
        }))
    }

    /// A method that takes no receiver.
    pub(crate) fn free<A, R, F>(name: &str, f: F) -> Self
    where
        A: HostArgs,
        R: IntoHost,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let name = name.to_string();
        Self::of::<A>(Arc::new(move |_, values| {
            let args = A::from_values(values)?;
            f(args).into_host().map_err(host_failure(&name))
        }))
    }

    pub(crate) fn invoke(&self, this: Option<&HostObject>, values: Vec<HostValue>) -> BridgeResult<HostValue> {
        (self.invoker)(this, values)
    }

    fn same_shape(&self, other: &Signature) -> bool {
        self.varargs == other.varargs && self.params == other.params
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(f, "({}{})", params.join(", "), if self.varargs { "..." } else { "" })
    }
}

/// All signatures registered under one name.
#[derive(Debug, Clone)]
pub struct OverloadSet {
    name: String,
    signatures: Vec<Signature>,
}

impl OverloadSet {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        OverloadSet {
            name: name.into(),
            signatures: Vec::new(),
        }
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Name used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signatures in resolution order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Returns true if no signature is registered.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Adds a signature unless one with the same shape already exists.
    pub(crate) fn add(&mut self, signature: Signature) {
        if self.signatures.iter().any(|known| known.same_shape(&signature)) {
            tracing::trace!(method = %self.name, ?signature, "duplicate signature ignored");
            return;
        }
        self.signatures.push(signature);
    }

    /// Resolves and calls a signature, returning the host result.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NoMatchingSignature`] when no signature accepts the
    /// arguments, carrying the rejection of the last candidate; any error of
    /// the called host closure otherwise.
    pub(crate) fn invoke_host(
        &self,
        bridge: &Arc<Bridge>,
        this: Option<&HostObject>,
        receiver: &Value,
        args: &[Value],
    ) -> BridgeResult<HostValue> {
        let mut last_mismatch = None;
        for signature in &self.signatures {
            match translator::to_host_args(bridge, &signature.params, signature.varargs, args, receiver) {
                Ok(values) => return signature.invoke(this, values),
                Err(error) if error.is_translation() => last_mismatch = Some(Box::new(error)),
                Err(error) => return Err(error),
            }
        }
        let engine = bridge.engine();
        let arguments: String = args
            .iter()
            .map(|arg| format!("{}, ", engine.display(arg)))
            .collect();
        Err(BridgeError::NoMatchingSignature {
            name: self.name.clone(),
            arguments,
            last_mismatch,
        })
    }

    /// Resolves and calls a signature, returning the result as a script value.
    pub(crate) fn invoke(
        &self,
        bridge: &Arc<Bridge>,
        this: Option<&HostObject>,
        receiver: &Value,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let result = self.invoke_host(bridge, this, receiver, args)?;
        translator::to_script(bridge, result)
    }
}
