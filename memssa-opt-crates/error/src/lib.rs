#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemSsaError(pub String);

impl std::fmt::Display for MemSsaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let MemSsaError(message) = self;
        write!(f, "MemSsaError: {}", message)
    }
}

impl std::error::Error for MemSsaError {}

#[macro_export]
macro_rules! mem_ssa_error {
    ($($arg:tt)*) => {
        $crate::MemSsaError(format!($($arg)*))
    }
}

pub type Result<T> = std::result::Result<T, MemSsaError>;
