//! Request and notification shapes.

use keel_core::TypeKey;
use std::any::Any;
use std::fmt;

/// Request dispatched to exactly one handler.
///
/// Commands and queries are both requests; the mediator does not
/// distinguish them.
pub trait Request: Send + Sync + 'static {
    /// Value produced by the handler
    type Response: Send + 'static;

    /// Dispatch key for this request shape.
    fn type_key() -> TypeKey {
        TypeKey::of::<Self>()
    }

    /// Structural validation run by the validation stage.
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Ok(())
    }
}

/// Notification routed to at most one handler.
pub trait Notification: Send + Sync + 'static {
    /// Dispatch key for this notification shape.
    fn type_key() -> TypeKey {
        TypeKey::of::<Self>()
    }
}

/// Type-erased request as seen by middleware.
pub trait AnyRequest: Send + Sync + 'static {
    /// Dispatch key of the concrete request.
    fn request_key(&self) -> TypeKey;

    /// Run the request's own validation.
    fn validate_dyn(&self) -> Result<(), Vec<ValidationError>>;

    fn as_any(&self) -> &(dyn Any + Send + Sync);

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<R: Request> AnyRequest for R {
    fn request_key(&self) -> TypeKey {
        <R as Request>::type_key()
    }

    fn validate_dyn(&self) -> Result<(), Vec<ValidationError>> {
        <R as Request>::validate(self)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl fmt::Debug for dyn AnyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyRequest").field(&self.request_key()).finish()
    }
}

/// Type-erased notification.
pub trait AnyNotification: Send + Sync + 'static {
    fn notification_key(&self) -> TypeKey;

    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

impl<N: Notification> AnyNotification for N {
    fn notification_key(&self) -> TypeKey {
        <N as Notification>::type_key()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Request travelling through the middleware chain.
pub type BoxedRequest = Box<dyn AnyRequest>;

/// Handler output travelling back through the middleware chain.
pub type BoxedResponse = Box<dyn Any + Send>;

/// Validation failure for a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field name that failed validation
    pub field: String,
    /// Error message
    pub message: String,
    /// Constraint that failed
    pub constraint: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            constraint: "custom".to_string(),
        }
    }

    /// Set the constraint name
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}
