// Type-erased opaque handle carried by descriptors and requests.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Arbitrary, opaque data a caller can attach to a [`PacketDescriptor`] or
/// [`Request`](crate::request::Request), and retrieve later via
/// [`UserInfo::downcast_ref`].
///
/// Mirrors the original `userInfo: id` parameter threaded through every
/// `ORSSerialPacketDescriptor`/`ORSSerialRequest` initializer.
#[derive(Clone, Default)]
pub struct UserInfo(Option<Arc<dyn Any + Send + Sync>>);

impl UserInfo {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(_) => write!(f, "UserInfo(Some)"),
            None => write!(f, "UserInfo(None)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_concrete_type() {
        let info = UserInfo::new(42u32);
        assert_eq!(info.downcast_ref::<u32>(), Some(&42));
        assert_eq!(info.downcast_ref::<String>(), None);
    }

    #[test]
    fn none_has_no_value() {
        let info = UserInfo::none();
        assert!(info.is_none());
        assert_eq!(info.downcast_ref::<u32>(), None);
    }
}
