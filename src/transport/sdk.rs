//! Adapter interface to a chat SDK living inside the host process.
//!
//! The SDK is versioned independently of this crate, so nothing here names
//! its concrete types. The host exposes its loaded modules through
//! [`HostModules`]; services are inspected member by member, and methods and
//! events describe their parameter lists at runtime so callers can check the
//! shape before using them.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

/// Role of one parameter in a runtime-described signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// The service instance raising an event
    Service,
    /// A channel handle; `null` addresses every joined channel
    Channel,
    /// A chat message object
    Message,
    Text,
    Bool,
    Other,
}

/// Callback attached to an SDK event. Receives the event arguments in the
/// order given by [`SdkEvent::params`].
pub type EventCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

pub trait SdkMethod: Send + Sync {
    fn params(&self) -> &[ParamKind];

    fn invoke(&self, args: Vec<Value>) -> Result<Value>;
}

pub trait SdkEvent: Send + Sync {
    fn params(&self) -> &[ParamKind];

    /// Attach `callback`, returning a token for [`SdkEvent::unsubscribe`].
    fn subscribe(&self, callback: EventCallback) -> Result<u64>;

    fn unsubscribe(&self, token: u64);
}

/// A named member found on a service.
#[derive(Clone)]
pub enum SdkMember {
    Method(Arc<dyn SdkMethod>),
    Event(Arc<dyn SdkEvent>),
    Property(Value),
}

impl SdkMember {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SdkMember::Method(_) => "method",
            SdkMember::Event(_) => "event",
            SdkMember::Property(_) => "property",
        }
    }
}

impl fmt::Debug for SdkMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkMember::Method(m) => write!(f, "Method({:?})", m.params()),
            SdkMember::Event(e) => write!(f, "Event({:?})", e.params()),
            SdkMember::Property(v) => write!(f, "Property({})", v),
        }
    }
}

pub trait SdkService: Send + Sync {
    fn member(&self, name: &str) -> Option<SdkMember>;
}

/// The host process' module registry.
pub trait HostModules: Send + Sync {
    fn is_loaded(&self, module_id: &str) -> bool;

    fn find_service(&self, module_id: &str, type_name: &str) -> Option<Arc<dyn SdkService>>;
}
