//! Call context passed to every engine operation.

use serde::{Deserialize, Serialize};

use crate::utils::crypto::Address;

/// Who is calling, and in which block
///
/// `timestamp` is the block timestamp swap deadlines are checked against;
/// there is no wall-clock waiting anywhere in the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Account invoking the operation
    pub caller: Address,
    /// Current block height
    pub block_height: u64,
    /// Current block timestamp (seconds)
    pub timestamp: u64,
}

impl CallContext {
    /// Create a context
    pub fn new(caller: Address, block_height: u64, timestamp: u64) -> Self {
        Self {
            caller,
            block_height,
            timestamp,
        }
    }

    /// Same block, different caller
    pub fn with_caller(self, caller: Address) -> Self {
        Self { caller, ..self }
    }
}
