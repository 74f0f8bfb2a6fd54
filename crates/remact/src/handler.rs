// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch tables for application handlers.
//!
//! Handlers are registered explicitly, keyed by destination method or, for
//! messages without a method, by payload type name.

use crate::actor_info::ActorInfo;
use crate::error::{ErrorCode, ErrorMessage};
use crate::message::{Payload, PayloadType, RemactMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handler for notifications and uncorrelated errors on a client port.
pub type NotificationHandler = Arc<dyn Fn(&RemactMessage) + Send + Sync>;

/// Client-side table of notification handlers.
#[derive(Clone, Default)]
pub struct NotificationTable {
    by_method: HashMap<String, NotificationHandler>,
    by_type: HashMap<String, NotificationHandler>,
    fallback: Option<NotificationHandler>,
}

impl NotificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle notifications sent to `method`.
    pub fn on_method<F>(&mut self, method: &str, f: F)
    where
        F: Fn(&RemactMessage) + Send + Sync + 'static,
    {
        self.by_method.insert(method.to_string(), Arc::new(f));
    }

    /// Handle notifications carrying payload type `T`.
    pub fn on_type<T, F>(&mut self, f: F)
    where
        T: PayloadType + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.by_type.insert(
            T::TYPE_NAME.to_string(),
            Arc::new(move |msg: &RemactMessage| match msg.payload.decode::<T>() {
                Ok(value) => f(value),
                Err(e) => warn!("dropping notification '{}': {}", msg.destination_method, e),
            }),
        );
    }

    /// Handle everything else, including uncorrelated errors.
    pub fn fallback<F>(&mut self, f: F)
    where
        F: Fn(&RemactMessage) + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
    }

    pub fn resolve(&self, msg: &RemactMessage) -> Option<NotificationHandler> {
        self.by_method
            .get(&msg.destination_method)
            .or_else(|| self.by_type.get(msg.payload.type_name()))
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Invoke the matching handler, if any.
    pub fn dispatch(&self, msg: &RemactMessage) -> bool {
        match self.resolve(msg) {
            Some(handler) => {
                handler(msg);
                true
            }
            None => {
                debug!(
                    "no handler for {:?} '{}' ({})",
                    msg.message_type,
                    msg.destination_method,
                    msg.payload.type_name()
                );
                false
            }
        }
    }
}

/// Context passed to service handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_id: i32,
    pub request_id: i32,
    /// Identity the client announced on connect.
    pub client: ActorInfo,
}

/// Outcome of a service handler.
pub type HandlerResult = Result<Payload, ErrorMessage>;

/// Service-side request or notification handler.
pub type MethodHandler = Arc<dyn Fn(&RemactMessage, &RequestContext) -> HandlerResult + Send + Sync>;

/// Service-side table of method handlers.
#[derive(Clone, Default)]
pub struct MethodTable {
    by_method: HashMap<String, MethodHandler>,
    by_type: HashMap<String, MethodHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untyped handler for `method`.
    pub fn on_method<F>(&mut self, method: &str, f: F)
    where
        F: Fn(&RemactMessage, &RequestContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.by_method.insert(method.to_string(), Arc::new(f));
    }

    /// Register a typed request handler for `method`.
    ///
    /// The request payload is decoded into `Req`; a payload of another type
    /// is answered with `UnexpectedMessageType`.
    pub fn on_request<Req, Resp, F>(&mut self, method: &str, f: F)
    where
        Req: PayloadType + 'static,
        Resp: PayloadType + 'static,
        F: Fn(Req, &RequestContext) -> Result<Resp, ErrorMessage> + Send + Sync + 'static,
    {
        self.by_method
            .insert(method.to_string(), Arc::new(typed_handler(f)));
    }

    /// Register a typed handler selected by payload type, for messages
    /// without a destination method.
    pub fn on_type<Req, Resp, F>(&mut self, f: F)
    where
        Req: PayloadType + 'static,
        Resp: PayloadType + 'static,
        F: Fn(Req, &RequestContext) -> Result<Resp, ErrorMessage> + Send + Sync + 'static,
    {
        self.by_type
            .insert(Req::TYPE_NAME.to_string(), Arc::new(typed_handler(f)));
    }

    pub fn resolve(&self, msg: &RemactMessage) -> Option<MethodHandler> {
        if msg.destination_method.is_empty() {
            return self.by_type.get(msg.payload.type_name()).cloned();
        }
        self.by_method
            .get(&msg.destination_method)
            .or_else(|| self.by_type.get(msg.payload.type_name()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_method.len() + self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn typed_handler<Req, Resp, F>(
    f: F,
) -> impl Fn(&RemactMessage, &RequestContext) -> HandlerResult + Send + Sync + 'static
where
    Req: PayloadType + 'static,
    Resp: PayloadType + 'static,
    F: Fn(Req, &RequestContext) -> Result<Resp, ErrorMessage> + Send + Sync + 'static,
{
    move |msg: &RemactMessage, ctx: &RequestContext| {
        let request = msg.payload.decode::<Req>().map_err(|e| {
            ErrorMessage::new(ErrorCode::UnexpectedMessageType, e.to_string())
        })?;
        f(request, ctx).map(|resp| Payload::new(&resp))
    }
}
