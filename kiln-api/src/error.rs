use crate::KilnDescriptorHeapType;

pub type KilnResult<T> = Result<T, KilnError>;

/// Generic error that contains all the different kinds of errors that may occur when using the API
#[derive(Debug, Clone, PartialEq)]
pub enum KilnError {
    StringError(String),
    /// The caller broke the command buffer, pass, or descriptor contract (opening a second pass,
    /// committing while encoding, freeing a slot twice, etc.)
    InvalidOperation(String),
    /// A fixed-capacity allocation ran out of space
    Exhausted {
        heap_type: KilnDescriptorHeapType,
        shader_visible: bool,
        capacity: u32,
    },
    /// The backend failed to create a native object
    DeviceCreationFailed(String),
    OutOfMemory,
    /// The device has already been torn down
    DeviceDestroyed,
}

impl std::error::Error for KilnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl core::fmt::Display for KilnError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            KilnError::StringError(ref e) => e.fmt(fmt),
            KilnError::InvalidOperation(ref e) => write!(fmt, "Invalid operation: {}", e),
            KilnError::Exhausted {
                heap_type,
                shader_visible,
                capacity,
            } => write!(
                fmt,
                "Descriptor heap {:?} (shader visible: {}) exhausted all {} persistent descriptors",
                heap_type, shader_visible, capacity
            ),
            KilnError::DeviceCreationFailed(ref e) => write!(fmt, "Device creation failed: {}", e),
            KilnError::OutOfMemory => write!(fmt, "Out of memory"),
            KilnError::DeviceDestroyed => write!(fmt, "The device has been destroyed"),
        }
    }
}

impl From<&str> for KilnError {
    fn from(str: &str) -> Self {
        KilnError::StringError(str.to_string())
    }
}

impl From<String> for KilnError {
    fn from(string: String) -> Self {
        KilnError::StringError(string)
    }
}

/// Logs the violation at error level and produces the error to return
pub(crate) fn invalid_operation(message: String) -> KilnError {
    log::error!("{}", message);
    KilnError::InvalidOperation(message)
}
